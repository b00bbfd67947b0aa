//! 连接端点场景测试
//!
//! # 教案级注释概览
//!
//! - **核心目标 (Why)**：验证解析 → 连接 → 活跃的主路径，以及解析失败、建连失败、活跃连接断开
//!   三条退避路径，并确认在解析中、连接中、活跃时请求停止都能收敛到终态且不遗留子对象；
//! - **结构说明 (How)**：与监听端测试相同，探针负责完成异步停止，测试负责投递事件；
//! - **合同与边界 (What)**：统计计数与状态迁移同时断言，覆盖 in-progress/established/broken/
//!   dropped/connect-errors 的全部增减规则。

use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use spark_endpoint::test_stubs::{
    ConnectionProbe, ResolverProbe, SocketCall, SocketProbe, StubConnection, StubResolver,
    StubSocket, StubTimer, TimerProbe,
};
use spark_endpoint::{
    AddressFamily, ConfigError, ConnectorEndpoint, ConnectorEvent, ConnectorParts, ConnectorState,
    Endpoint, EndpointOptions, EndpointRole, EndpointStats, ResolverEvent, SessionEvent,
    SocketEvent, Statistic, TimerEvent,
};

type Connector =
    ConnectorEndpoint<StubSocket, StubTimer, StubResolver, StubConnection, Arc<EndpointStats>>;

const PEER: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10));

struct Harness {
    endpoint: Connector,
    socket: SocketProbe,
    timer: TimerProbe,
    resolver: ResolverProbe,
    session: ConnectionProbe,
    stats: Arc<EndpointStats>,
}

fn build(address: &str, options: EndpointOptions) -> Result<Harness, ConfigError> {
    let (socket, socket_probe) = StubSocket::new();
    let (timer, timer_probe) = StubTimer::new();
    let (resolver, resolver_probe) = StubResolver::new();
    let (session, session_probe) = StubConnection::new();
    let stats = EndpointStats::shared();
    let endpoint = ConnectorEndpoint::create(
        address,
        options,
        ConnectorParts {
            socket,
            timer,
            resolver,
            session,
        },
        Arc::clone(&stats),
    )?;
    Ok(Harness {
        endpoint,
        socket: socket_probe,
        timer: timer_probe,
        resolver: resolver_probe,
        session: session_probe,
        stats,
    })
}

fn connector(address: &str) -> Harness {
    build(address, EndpointOptions::default()).expect("valid connect address")
}

impl Harness {
    fn resolve(&mut self, result: Result<IpAddr, io::ErrorKind>) {
        self.endpoint
            .handle(ConnectorEvent::Resolver(ResolverEvent::Done(result)));
        assert_eq!(self.endpoint.state(), ConnectorState::StoppingResolver);
        assert!(self.resolver.complete_stop(), "resolver was not stopping");
        self.endpoint
            .handle(ConnectorEvent::Resolver(ResolverEvent::Stopped));
    }

    fn connected(&mut self) {
        self.resolve(Ok(PEER));
        assert_eq!(self.endpoint.state(), ConnectorState::Connecting);
        self.endpoint
            .handle(ConnectorEvent::Socket(SocketEvent::Connected));
        assert_eq!(self.endpoint.state(), ConnectorState::Active);
    }

    fn socket_stopped(&mut self) {
        assert!(self.socket.complete_stop(), "socket was not stopping");
        self.endpoint
            .handle(ConnectorEvent::Socket(SocketEvent::Stopped));
    }

    fn session_stopped(&mut self) {
        assert!(self.session.complete_stop(), "session was not stopping");
        self.endpoint
            .handle(ConnectorEvent::Session(SessionEvent::Stopped));
    }

    fn retry_fires(&mut self) {
        self.endpoint
            .handle(ConnectorEvent::Retry(TimerEvent::Timeout));
        assert_eq!(self.endpoint.state(), ConnectorState::StoppingBackoff);
        assert!(self.timer.complete_stop(), "timer was not stopping");
        self.endpoint
            .handle(ConnectorEvent::Retry(TimerEvent::Stopped));
    }

    fn connect_attempts(&self) -> usize {
        self.socket
            .count(|call| matches!(call, SocketCall::Connect(_)))
    }
}

#[test]
fn resolves_connects_and_hands_socket_to_session() {
    let mut harness = connector("example.com:5555");
    assert_eq!(harness.endpoint.state(), ConnectorState::Resolving);
    assert_eq!(
        harness.resolver.lookups(),
        vec![("example.com".to_owned(), true)]
    );

    harness.resolve(Ok(PEER));
    assert_eq!(harness.endpoint.state(), ConnectorState::Connecting);
    let local: SocketAddr = "0.0.0.0:0".parse().expect("literal");
    let remote = SocketAddr::new(PEER, 5555);
    assert_eq!(
        harness.socket.calls(),
        vec![
            SocketCall::Start(AddressFamily::Ipv4),
            SocketCall::SendBuffer(128 * 1024),
            SocketCall::RecvBuffer(128 * 1024),
            SocketCall::Bind(local),
            SocketCall::Connect(remote),
        ]
    );
    assert_eq!(harness.stats.get(Statistic::InProgressConnections), 1);
    assert_eq!(harness.endpoint.remote_addr(), Some(remote));

    harness
        .endpoint
        .handle(ConnectorEvent::Socket(SocketEvent::Connected));
    assert_eq!(harness.endpoint.state(), ConnectorState::Active);
    assert_eq!(harness.session.starts(), 1);
    let snapshot = harness.stats.snapshot();
    assert_eq!(snapshot.in_progress_connections, 0);
    assert_eq!(snapshot.established_connections, 1);
    assert_eq!(snapshot.last_error, None);
}

#[test]
fn connect_error_counts_and_never_reaches_active() {
    let mut harness = connector("example.com:5555");
    harness.resolve(Ok(PEER));
    harness.socket.set_last_error(io::ErrorKind::ConnectionRefused);

    harness
        .endpoint
        .handle(ConnectorEvent::Socket(SocketEvent::Error));
    assert_eq!(harness.endpoint.state(), ConnectorState::StoppingSocket);
    let snapshot = harness.stats.snapshot();
    assert_eq!(snapshot.connect_errors, 1);
    assert_eq!(snapshot.in_progress_connections, 0);
    assert_eq!(snapshot.established_connections, 0);
    assert_eq!(snapshot.last_error, Some(io::ErrorKind::ConnectionRefused));

    harness
        .endpoint
        .handle(ConnectorEvent::Socket(SocketEvent::Shutdown));
    harness.socket_stopped();
    assert_eq!(harness.endpoint.state(), ConnectorState::Waiting);
    assert_eq!(harness.timer.intervals(), vec![Duration::from_millis(100)]);
    assert_eq!(harness.session.starts(), 0);
}

#[test]
fn broken_active_connection_is_re_resolved_before_reconnecting() {
    let mut harness = connector("example.com:5555");
    harness.connected();

    harness
        .endpoint
        .handle(ConnectorEvent::Session(SessionEvent::Error));
    assert_eq!(harness.endpoint.state(), ConnectorState::StoppingSession);
    assert_eq!(harness.stats.get(Statistic::BrokenConnections), 1);
    assert!(harness.session.is_stopping());
    assert!(!harness.socket.is_stopping(), "socket waits for the session");

    harness.session_stopped();
    assert_eq!(harness.endpoint.state(), ConnectorState::StoppingSocket);
    harness.socket_stopped();
    assert_eq!(harness.endpoint.state(), ConnectorState::Waiting);

    harness.retry_fires();
    assert_eq!(harness.endpoint.state(), ConnectorState::Resolving);
    assert_eq!(harness.resolver.lookups().len(), 2);
    assert_eq!(harness.connect_attempts(), 1, "no reconnect before resolving");

    harness.resolve(Ok(IpAddr::V4(Ipv4Addr::new(192, 0, 2, 11))));
    assert_eq!(harness.connect_attempts(), 2);
    assert_eq!(
        harness.endpoint.remote_addr(),
        Some("192.0.2.11:5555".parse().expect("literal"))
    );
}

#[test]
fn unresolvable_host_waits_and_resolves_again() {
    let options = EndpointOptions::default().with_reconnect_interval(Duration::from_millis(250));
    let mut harness = build("nonexistent.invalid:5555", options).expect("valid hostname");

    harness.resolve(Err(io::ErrorKind::NotFound));
    assert_eq!(harness.endpoint.state(), ConnectorState::Waiting);
    assert_eq!(harness.timer.intervals(), vec![Duration::from_millis(250)]);
    assert_eq!(harness.connect_attempts(), 0);

    harness.retry_fires();
    assert_eq!(harness.endpoint.state(), ConnectorState::Resolving);
    assert_eq!(
        harness.resolver.lookups(),
        vec![
            ("nonexistent.invalid".to_owned(), true),
            ("nonexistent.invalid".to_owned(), true),
        ]
    );
}

#[test]
fn backoff_keeps_growing_across_retry_cycles() {
    let options = EndpointOptions::default()
        .with_reconnect_interval(Duration::from_millis(100))
        .with_reconnect_interval_max(Duration::from_millis(500));
    let mut harness = build("example.com:80", options).expect("valid");

    for _ in 0..4 {
        harness.resolve(Err(io::ErrorKind::NotFound));
        harness.retry_fires();
    }
    let expected: Vec<_> = [100, 200, 400, 500]
        .into_iter()
        .map(Duration::from_millis)
        .collect();
    assert_eq!(harness.timer.intervals(), expected);
}

#[test]
fn bind_failure_stops_socket_before_backing_off() {
    let mut harness = connector("example.com:5555");
    harness.socket.fail_next_bind(io::ErrorKind::AddrNotAvailable);
    harness.resolve(Ok(PEER));

    assert_eq!(harness.endpoint.state(), ConnectorState::StoppingSocket);
    assert_eq!(harness.connect_attempts(), 0);
    let snapshot = harness.stats.snapshot();
    assert_eq!(snapshot.last_error, Some(io::ErrorKind::AddrNotAvailable));
    assert_eq!(snapshot.connect_errors, 0);
    harness.socket_stopped();
    assert_eq!(harness.endpoint.state(), ConnectorState::Waiting);
}

#[test]
fn immediate_connect_failure_counts_as_connect_error() {
    let mut harness = connector("example.com:5555");
    harness.socket.fail_next_connect(io::ErrorKind::NetworkUnreachable);
    harness.resolve(Ok(PEER));

    assert_eq!(harness.endpoint.state(), ConnectorState::StoppingSocket);
    let snapshot = harness.stats.snapshot();
    assert_eq!(snapshot.connect_errors, 1);
    assert_eq!(snapshot.in_progress_connections, 0);
    assert_eq!(snapshot.last_error, Some(io::ErrorKind::NetworkUnreachable));
}

#[test]
fn socket_open_failure_backs_off_directly() {
    let mut harness = connector("example.com:5555");
    harness.socket.fail_next_start(io::ErrorKind::Other);
    harness.resolve(Ok(PEER));

    assert_eq!(harness.endpoint.state(), ConnectorState::Waiting);
    assert_eq!(harness.socket.count(|call| *call == SocketCall::Stop), 0);
    assert_eq!(harness.stats.snapshot().last_error, Some(io::ErrorKind::Other));
}

#[test]
fn buffer_sizing_failures_are_ignored() {
    let mut harness = connector("example.com:5555");
    harness.socket.fail_buffers(io::ErrorKind::InvalidInput);
    harness.resolve(Ok(PEER));
    assert_eq!(harness.endpoint.state(), ConnectorState::Connecting);
}

#[test]
fn local_interface_is_bound_before_connecting() {
    let mut harness = connector("127.0.0.1;example.com:80");
    harness.resolve(Ok(IpAddr::V4(Ipv4Addr::LOCALHOST)));
    let local: SocketAddr = "127.0.0.1:0".parse().expect("literal");
    assert!(harness.socket.calls().contains(&SocketCall::Bind(local)));
}

#[test]
fn wildcard_local_address_follows_the_remote_family() {
    let options = EndpointOptions::default().with_ipv4_only(false);
    let mut harness = build("localhost:80", options).expect("valid");
    assert_eq!(harness.resolver.lookups(), vec![("localhost".to_owned(), false)]);

    harness.resolve(Ok("::1".parse().expect("literal")));
    let local: SocketAddr = "[::]:0".parse().expect("literal");
    let calls = harness.socket.calls();
    assert_eq!(calls[0], SocketCall::Start(AddressFamily::Ipv6));
    assert!(calls.contains(&SocketCall::Bind(local)));
}

#[test]
fn invalid_addresses_are_rejected_at_creation() {
    for address in ["example.com:0", "example.com", "bad_host!:80", "[::1]:80"] {
        let error = build(address, EndpointOptions::default())
            .err()
            .unwrap_or_else(|| panic!("`{address}` should be rejected"));
        assert!(matches!(error, ConfigError::InvalidAddress { .. }), "{address}");
    }
    let error = build("eth0;example.com:80", EndpointOptions::default())
        .err()
        .expect("named interface");
    assert!(matches!(error, ConfigError::NoSuchInterface { .. }));
}

#[test]
fn stop_while_resolving_converges() {
    let mut harness = connector("example.com:5555");
    harness.endpoint.stop();
    assert_eq!(harness.endpoint.state(), ConnectorState::Stopping);
    assert!(harness.resolver.is_stopping());

    // 已在途的解析结果在关闭阶段被吸收。
    harness
        .endpoint
        .handle(ConnectorEvent::Resolver(ResolverEvent::Done(Ok(PEER))));
    assert!(!harness.endpoint.is_stopped());

    assert!(harness.resolver.complete_stop());
    harness
        .endpoint
        .handle(ConnectorEvent::Resolver(ResolverEvent::Stopped));
    assert!(harness.endpoint.is_stopped());
    assert!(harness.stats.is_stopped());
    assert_eq!(harness.connect_attempts(), 0);
}

#[test]
fn stop_while_connecting_releases_in_progress_count() {
    let mut harness = connector("example.com:5555");
    harness.resolve(Ok(PEER));
    harness.endpoint.stop();

    assert_eq!(harness.endpoint.state(), ConnectorState::Stopping);
    assert_eq!(harness.stats.get(Statistic::InProgressConnections), 0);
    assert_eq!(harness.stats.get(Statistic::DroppedConnections), 0);
    harness.socket_stopped();
    assert!(harness.endpoint.is_stopped());
    assert_eq!(harness.session.starts(), 0);
}

#[test]
fn stop_while_active_drops_the_connection_first() {
    let mut harness = connector("example.com:5555");
    harness.connected();

    harness.endpoint.stop();
    assert_eq!(harness.endpoint.state(), ConnectorState::StoppingSessionFinal);
    assert_eq!(harness.stats.get(Statistic::DroppedConnections), 1);
    assert!(!harness.socket.is_stopping(), "socket waits for the session");

    harness.session_stopped();
    assert_eq!(harness.endpoint.state(), ConnectorState::Stopping);
    assert!(!harness.endpoint.is_stopped());

    harness.socket_stopped();
    assert!(harness.endpoint.is_stopped());
    assert!(harness.session.is_idle());
    assert!(harness.resolver.is_idle());
    assert!(harness.timer.is_idle());
}

#[test]
fn stop_while_waiting_stops_the_timer() {
    let mut harness = connector("example.com:5555");
    harness.resolve(Err(io::ErrorKind::NotFound));
    harness.endpoint.stop();
    assert_eq!(harness.endpoint.state(), ConnectorState::Stopping);

    assert!(harness.timer.complete_stop());
    harness
        .endpoint
        .handle(ConnectorEvent::Retry(TimerEvent::Stopped));
    assert!(harness.endpoint.is_stopped());
}

#[test]
fn stop_leaves_an_idle_session_untouched() {
    let mut harness = connector("example.com:5555");
    harness.endpoint.stop();
    assert_eq!(harness.session.stops(), 0);

    let mut harness = connector("example.com:5555");
    harness.resolve(Err(io::ErrorKind::NotFound));
    assert_eq!(harness.endpoint.state(), ConnectorState::Waiting);
    harness.endpoint.stop();
    assert_eq!(harness.session.stops(), 0);
}

#[test]
fn stop_is_idempotent() {
    let mut harness = connector("example.com:5555");
    harness.connected();
    harness.endpoint.stop();
    harness.endpoint.stop();
    assert_eq!(harness.stats.get(Statistic::DroppedConnections), 1);
    assert_eq!(harness.session.stops(), 1);
}

#[test]
fn stopped_connector_is_destroyed_through_the_shared_contract() {
    let mut harness = connector("example.com:5555");
    harness.endpoint.stop();
    assert!(harness.resolver.complete_stop());
    harness
        .endpoint
        .handle(ConnectorEvent::Resolver(ResolverEvent::Stopped));

    let endpoint: Box<dyn Endpoint> = Box::new(harness.endpoint);
    assert_eq!(endpoint.role(), EndpointRole::Connector);
    assert_eq!(endpoint.address(), "example.com:5555");
    assert!(endpoint.is_stopped());
    endpoint.destroy();
}

#[test]
#[should_panic(expected = "illegal event")]
fn connected_while_resolving_is_fatal() {
    let mut harness = connector("example.com:5555");
    harness
        .endpoint
        .handle(ConnectorEvent::Socket(SocketEvent::Connected));
}

#[test]
#[should_panic(expected = "illegal event")]
fn session_error_while_connecting_is_fatal() {
    let mut harness = connector("example.com:5555");
    harness.resolve(Ok(PEER));
    harness
        .endpoint
        .handle(ConnectorEvent::Session(SessionEvent::Error));
}

#[test]
#[should_panic(expected = "illegal event")]
fn events_after_termination_are_fatal() {
    let mut harness = connector("example.com:5555");
    harness.endpoint.stop();
    assert!(harness.resolver.complete_stop());
    harness
        .endpoint
        .handle(ConnectorEvent::Resolver(ResolverEvent::Stopped));
    harness
        .endpoint
        .handle(ConnectorEvent::Resolver(ResolverEvent::Stopped));
}

#[test]
#[should_panic(expected = "illegal event")]
fn destroying_a_running_connector_is_fatal() {
    let harness = connector("example.com:5555");
    let endpoint: Box<dyn Endpoint> = Box::new(harness.endpoint);
    endpoint.destroy();
}

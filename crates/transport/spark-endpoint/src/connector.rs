//! 连接端点：解析对端地址、建立出站连接，并在失败后重新解析重试。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 同一时刻只维持一条活跃的出站连接；解析失败、建连失败与活跃连接断开都被退避重试吸收，
//!   调用方只能通过统计与“最近一次错误”观测到它们；
//! - 活跃连接断开后总是从解析重新开始，避免连向已经失效的缓存地址。
//!
//! ## 状态迁移（How）
//! ```text
//! Idle ─▶ Resolving ─Done─▶ StoppingResolver ─Stopped─▶ Connecting ─Connected─▶ Active
//!             ▲                    │ 解析失败              │ 连接失败              │ 会话错误
//!             │                    ▼                       ▼                       ▼
//!   StoppingBackoff ◀─Timeout─ Waiting ◀──Stopped── StoppingSocket ◀─Stopped─ StoppingSession
//!
//! stop: 任意状态 ─▶ StoppingSessionFinal ─▶ Stopping ─▶ Idle(终态)
//! ```
//!
//! ## 契约（What）
//! - 解析器投递结果后仍需显式停止；只有在它报告 `Stopped` 之后才会使用结果；
//! - 打开、绑定、发起连接任一步失败都不会原地重试：已打开的套接字先停止，再进入退避；
//! - 关闭：若会话处于活跃状态则记为一次被丢弃的连接并停止会话；会话空闲后并行停止
//!   定时器、套接字与解析器，三者均空闲后报告停止。
//!
//! ## 注意事项（Trade-offs）
//! - `ipv4_only` 原样交给解析器，解析器是否据此过滤地址族由其自身决定。

use std::io;
use std::net::{IpAddr, SocketAddr};

use tracing::{debug, info, trace, warn};

use crate::address::{AddressFamily, ConnectAddress};
use crate::backoff::Backoff;
use crate::collaborator::{
    ConnectorEvent, NameResolver, ResolverEvent, RetryTimer, Session, SessionEvent, SocketEvent,
    StreamSocket, TimerEvent,
};
use crate::endpoint::{Endpoint, EndpointRole};
use crate::error::{ConfigError, contract_violation};
use crate::fsm::{Fsm, FsmPhase, Route};
use crate::options::EndpointOptions;
use crate::stats::{EndpointHost, Statistic};

const MACHINE: &str = "connector endpoint";

/// 连接端点的内部状态。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ConnectorState {
    Idle,
    Resolving,
    /// 已拿到解析结果，等待解析器停止。
    StoppingResolver,
    Connecting,
    Active,
    /// 会话报告错误，等待其停止。
    StoppingSession,
    /// 等待套接字停止，随后进入退避。
    StoppingSocket,
    Waiting,
    StoppingBackoff,
    /// 关闭第一阶段：等待会话空闲。
    StoppingSessionFinal,
    /// 关闭第二阶段：等待定时器、套接字与解析器空闲。
    Stopping,
}

/// 连接端点独占的协作者。
pub struct ConnectorParts<S, T, R, N> {
    pub socket: S,
    pub timer: T,
    pub resolver: R,
    pub session: N,
}

/// 连接端点。
pub struct ConnectorEndpoint<S, T, R, N, H> {
    fsm: Fsm,
    state: ConnectorState,
    address: String,
    target: ConnectAddress,
    options: EndpointOptions,
    socket: S,
    retry: Backoff<T>,
    resolver: R,
    resolved: Option<Result<IpAddr, io::ErrorKind>>,
    remote: Option<SocketAddr>,
    session: N,
    host: H,
}

impl<S, T, R, N, H> ConnectorEndpoint<S, T, R, N, H>
where
    S: StreamSocket,
    T: RetryTimer,
    R: NameResolver,
    N: Session<Socket = S>,
    H: EndpointHost,
{
    /// 校验地址、接管协作者并立即开始解析对端。
    pub fn create(
        address: &str,
        options: EndpointOptions,
        parts: ConnectorParts<S, T, R, N>,
        host: H,
    ) -> Result<Self, ConfigError> {
        let target = ConnectAddress::parse(address, options.ipv4_only)?;
        let retry = Backoff::new(
            parts.timer,
            options.reconnect_interval(),
            options.reconnect_interval_max(),
        );
        let mut endpoint = Self {
            fsm: Fsm::new(MACHINE),
            state: ConnectorState::Idle,
            address: address.to_owned(),
            target,
            options,
            socket: parts.socket,
            retry,
            resolver: parts.resolver,
            resolved: None,
            remote: None,
            session: parts.session,
            host,
        };
        endpoint.fsm.start();
        debug!(endpoint = %endpoint.address, "connector endpoint created");
        endpoint.start_resolving();
        Ok(endpoint)
    }

    pub fn handle(&mut self, event: ConnectorEvent) {
        match self.fsm.route(&event) {
            Route::Handler => self.on_event(event),
            Route::Shutdown => {
                trace!(endpoint = %self.address, ?event, "event while stopping");
                self.advance_shutdown();
            }
        }
    }

    /// 请求停止；非运行态下为空操作。
    pub fn stop(&mut self) {
        if !self.fsm.begin_stop() {
            return;
        }
        debug!(endpoint = %self.address, state = ?self.state, "stopping connector endpoint");
        match self.state {
            ConnectorState::Active => {
                self.host.record(Statistic::DroppedConnections, 1);
            }
            ConnectorState::Connecting => {
                self.host.record(Statistic::InProgressConnections, -1);
            }
            _ => {}
        }
        if !self.session.is_idle() {
            self.session.stop();
        }
        self.state = ConnectorState::StoppingSessionFinal;
        self.advance_shutdown();
    }

    pub fn state(&self) -> ConnectorState {
        self.state
    }

    pub fn phase(&self) -> FsmPhase {
        self.fsm.phase()
    }

    pub fn is_stopped(&self) -> bool {
        self.fsm.phase() == FsmPhase::Stopped
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn target(&self) -> &ConnectAddress {
        &self.target
    }

    /// 最近一次发起连接的远端地址。
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry.attempts()
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn session(&self) -> &N {
        &self.session
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    fn on_event(&mut self, event: ConnectorEvent) {
        match (self.state, event) {
            (ConnectorState::Resolving, ConnectorEvent::Resolver(ResolverEvent::Done(result))) => {
                self.resolved = Some(result);
                self.resolver.stop();
                self.state = ConnectorState::StoppingResolver;
            }
            (
                ConnectorState::StoppingResolver,
                ConnectorEvent::Resolver(ResolverEvent::Stopped),
            ) => self.on_resolved(),
            (ConnectorState::Connecting, ConnectorEvent::Socket(SocketEvent::Connected)) => {
                self.session.start(&mut self.socket);
                self.host.record(Statistic::InProgressConnections, -1);
                self.host.record(Statistic::EstablishedConnections, 1);
                self.host.clear_error();
                self.state = ConnectorState::Active;
                info!(endpoint = %self.address, remote = ?self.remote, "connected");
            }
            (ConnectorState::Connecting, ConnectorEvent::Socket(SocketEvent::Error)) => {
                let kind = self.socket.last_error().unwrap_or(io::ErrorKind::Other);
                warn!(
                    endpoint = %self.address,
                    remote = ?self.remote,
                    error = ?kind,
                    "connect failed"
                );
                self.host.record(Statistic::InProgressConnections, -1);
                self.host.record(Statistic::ConnectErrors, 1);
                self.host.set_error(kind);
                self.socket.stop();
                self.state = ConnectorState::StoppingSocket;
            }
            (ConnectorState::Active, ConnectorEvent::Session(SessionEvent::Error)) => {
                debug!(endpoint = %self.address, "connection broken, reconnecting");
                self.session.stop();
                self.host.record(Statistic::BrokenConnections, 1);
                self.state = ConnectorState::StoppingSession;
            }
            (ConnectorState::StoppingSession, ConnectorEvent::Socket(SocketEvent::Shutdown)) => {}
            (ConnectorState::StoppingSession, ConnectorEvent::Session(SessionEvent::Stopped)) => {
                self.socket.stop();
                self.state = ConnectorState::StoppingSocket;
            }
            (ConnectorState::StoppingSocket, ConnectorEvent::Socket(SocketEvent::Shutdown)) => {}
            (ConnectorState::StoppingSocket, ConnectorEvent::Socket(SocketEvent::Stopped)) => {
                self.wait_before_retry()
            }
            (ConnectorState::Waiting, ConnectorEvent::Retry(TimerEvent::Timeout)) => {
                self.retry.stop();
                self.state = ConnectorState::StoppingBackoff;
            }
            (ConnectorState::StoppingBackoff, ConnectorEvent::Retry(TimerEvent::Stopped)) => {
                self.start_resolving()
            }
            (state, event) => contract_violation(MACHINE, &state, &event),
        }
    }

    fn start_resolving(&mut self) {
        self.resolver
            .start(self.target.host(), self.options.ipv4_only);
        self.state = ConnectorState::Resolving;
        debug!(endpoint = %self.address, host = self.target.host(), "resolving peer");
    }

    fn on_resolved(&mut self) {
        match self.resolved.take() {
            Some(Ok(ip)) => self.start_connecting(ip),
            Some(Err(kind)) => {
                warn!(
                    endpoint = %self.address,
                    host = self.target.host(),
                    error = ?kind,
                    "failed to resolve peer, backing off"
                );
                self.wait_before_retry();
            }
            None => contract_violation(MACHINE, &self.state, &"resolver stopped without a result"),
        }
    }

    fn start_connecting(&mut self, ip: IpAddr) {
        let remote = self.target.remote_addr(ip);
        let local = self.target.local_addr(&ip);
        self.remote = Some(remote);

        if let Err(error) = self.socket.start(AddressFamily::of(&ip)) {
            warn!(endpoint = %self.address, %remote, %error, "failed to open socket, backing off");
            self.host.set_error(error.kind());
            self.wait_before_retry();
            return;
        }
        if let Err(error) = self.socket.set_send_buffer(self.options.sndbuf) {
            warn!(endpoint = %self.address, %error, "ignoring send buffer size failure");
        }
        if let Err(error) = self.socket.set_recv_buffer(self.options.rcvbuf) {
            warn!(endpoint = %self.address, %error, "ignoring receive buffer size failure");
        }
        if let Err(error) = self.socket.bind(local) {
            warn!(endpoint = %self.address, %local, %error, "failed to bind local address");
            self.host.set_error(error.kind());
            self.socket.stop();
            self.state = ConnectorState::StoppingSocket;
            return;
        }
        if let Err(error) = self.socket.connect(remote) {
            warn!(endpoint = %self.address, %remote, %error, "failed to issue connect");
            self.host.record(Statistic::ConnectErrors, 1);
            self.host.set_error(error.kind());
            self.socket.stop();
            self.state = ConnectorState::StoppingSocket;
            return;
        }

        self.host.record(Statistic::InProgressConnections, 1);
        self.state = ConnectorState::Connecting;
        debug!(endpoint = %self.address, %local, %remote, "connecting");
    }

    fn wait_before_retry(&mut self) {
        let interval = self.retry.start();
        debug!(endpoint = %self.address, ?interval, "waiting before next connect attempt");
        self.state = ConnectorState::Waiting;
    }

    fn advance_shutdown(&mut self) {
        if self.state == ConnectorState::StoppingSessionFinal {
            if !self.session.is_idle() {
                return;
            }
            self.retry.stop();
            self.socket.stop();
            self.resolver.stop();
            self.state = ConnectorState::Stopping;
        }
        if self.state == ConnectorState::Stopping {
            if !self.retry.is_idle() || !self.socket.is_idle() || !self.resolver.is_idle() {
                return;
            }
            self.state = ConnectorState::Idle;
            self.fsm.finish_stop();
            self.host.stopped();
            info!(endpoint = %self.address, "connector endpoint stopped");
        }
    }
}

impl<S, T, R, N, H> Endpoint for ConnectorEndpoint<S, T, R, N, H>
where
    S: StreamSocket,
    T: RetryTimer,
    R: NameResolver,
    N: Session<Socket = S>,
    H: EndpointHost,
{
    fn role(&self) -> EndpointRole {
        EndpointRole::Connector
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn stop(&mut self) {
        ConnectorEndpoint::stop(self);
    }

    fn is_stopped(&self) -> bool {
        self.fsm.phase() == FsmPhase::Stopped
    }

    fn destroy(self: Box<Self>) {
        if self.fsm.phase() != FsmPhase::Stopped {
            contract_violation(MACHINE, &self.state, &"destroy");
        }
        debug!(endpoint = %self.address, "connector endpoint destroyed");
    }
}

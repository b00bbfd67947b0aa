//! 端点驱动任务与对外句柄。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 端点状态机要求事件串行投递；驱动任务独占端点，依次从邮箱取出事件调用 `handle`，
//!   调用方只通过 [`EndpointHandle`] 观测统计与请求停止。
//!
//! ## 契约（What）
//! - `spawn_listener` / `spawn_connector` 必须在 Tokio 运行时上下文中调用：协作者在端点
//!   创建期间就会派生后台任务；
//! - 地址非法时同步返回 [`ConfigError`]，不会派生驱动任务；
//! - 驱动任务在端点确认停止后销毁端点并退出，之后不再向端点投递任何事件；
//! - 丢弃 [`EndpointHandle`] 同样会触发停止，但调用方无法再等待其完成。
//!
//! ## 注意事项（Trade-offs）
//! - 端点在契约违例时 panic，驱动任务随之终止；[`EndpointHandle::stop`] 以
//!   [`DriverError`] 报告这一情况。

use std::net::SocketAddr;
use std::sync::Arc;

use spark_endpoint::{
    ConfigError, ConnectorEndpoint, ConnectorEvent, ConnectorParts, Endpoint, EndpointOptions,
    EndpointRole, EndpointStats, ListenerEndpoint, ListenerEvent, ListenerParts, StatsSnapshot,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::connection::{Connection, ConnectionFactory, ConnectionHandler};
use crate::error::DriverError;
use crate::mailbox::{mailbox, poster};
use crate::resolver::TokioResolver;
use crate::socket::{LocalAddrSlot, TokioSocket};
use crate::timer::TokioTimer;

/// 以 Tokio 协作者组装的监听端点。
pub type TcpListenerEndpoint<H> =
    ListenerEndpoint<TokioSocket, TokioTimer, ConnectionFactory<H>, Arc<EndpointStats>>;

/// 以 Tokio 协作者组装的连接端点。
pub type TcpConnectorEndpoint<H> = ConnectorEndpoint<
    TokioSocket,
    TokioTimer,
    TokioResolver,
    Connection<H>,
    Arc<EndpointStats>,
>;

/// 可由驱动任务独占驱动的端点。
trait Driven: Endpoint + Send + 'static {
    type Event: Send + 'static;

    fn dispatch(&mut self, event: Self::Event);
}

impl<H: ConnectionHandler> Driven for TcpListenerEndpoint<H> {
    type Event = ListenerEvent;

    fn dispatch(&mut self, event: ListenerEvent) {
        self.handle(event);
    }
}

impl<H: ConnectionHandler> Driven for TcpConnectorEndpoint<H> {
    type Event = ConnectorEvent;

    fn dispatch(&mut self, event: ConnectorEvent) {
        self.handle(event);
    }
}

async fn drive<D: Driven>(
    mut endpoint: D,
    mut events: UnboundedReceiver<D::Event>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut stop_requested = false;
    while !endpoint.is_stopped() {
        tokio::select! {
            _ = &mut stop, if !stop_requested => {
                stop_requested = true;
                debug!(role = %endpoint.role(), endpoint = endpoint.address(), "stop requested");
                Endpoint::stop(&mut endpoint);
            }
            event = events.recv() => match event {
                Some(event) => endpoint.dispatch(event),
                None => {
                    error!(
                        role = %endpoint.role(),
                        endpoint = endpoint.address(),
                        "endpoint mailbox closed before the endpoint stopped"
                    );
                    return;
                }
            },
        }
    }
    Box::new(endpoint).destroy();
}

/// 正在运行的端点句柄。
#[derive(Debug)]
pub struct EndpointHandle {
    role: EndpointRole,
    address: String,
    stats: Arc<EndpointStats>,
    local_addr: LocalAddrSlot,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl EndpointHandle {
    fn spawn<D: Driven>(
        endpoint: D,
        events: UnboundedReceiver<D::Event>,
        stats: Arc<EndpointStats>,
        local_addr: LocalAddrSlot,
    ) -> Self {
        let role = endpoint.role();
        let address = endpoint.address().to_owned();
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(drive(endpoint, events, stop_rx));
        Self {
            role,
            address,
            stats,
            local_addr,
            stop: Some(stop),
            task,
        }
    }

    pub fn role(&self) -> EndpointRole {
        self.role
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// 当前监听或连接所用的本地地址；套接字重建期间为 `None`。
    ///
    /// 监听端绑定端口 0 时，可借此获知系统分配的端口。
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    /// 请求停止并等待级联关闭完成，返回停止时的统计快照。
    pub async fn stop(mut self) -> Result<StatsSnapshot, DriverError> {
        if let Some(stop) = self.stop.take() {
            // 驱动任务已经退出时接收端不存在，忽略发送失败。
            let _ = stop.send(());
        }
        self.task.await?;
        Ok(self.stats.snapshot())
    }
}

/// 在当前运行时中启动监听端点。
///
/// # 教案式说明
/// - **契约 (What)**：`address` 形如 `iface:port`，`iface` 可为 `*` 或 IP 字面量；
///   每个入站连接交给 `handler.serve` 处理；
/// - **执行 (How)**：组装 Tokio 协作者，创建端点（立即尝试监听），再派生驱动任务；
///   监听失败不会在这里报告，而是进入退避重试，可通过 [`EndpointHandle::stats`] 观测。
pub fn spawn_listener<H: ConnectionHandler>(
    address: &str,
    options: EndpointOptions,
    handler: Arc<H>,
) -> Result<EndpointHandle, ConfigError> {
    let (sender, events) = mailbox::<ListenerEvent>();
    let socket = TokioSocket::for_listener(poster(&sender, ListenerEvent::Socket));
    let local_addr = socket.local_addr_slot();
    let timer = TokioTimer::new(poster(&sender, ListenerEvent::Retry));
    let acceptors = ConnectionFactory::new(handler, sender);
    let stats = EndpointStats::shared();
    let parts = ListenerParts {
        socket,
        timer,
        acceptors,
    };
    let endpoint: TcpListenerEndpoint<H> =
        ListenerEndpoint::create(address, options, parts, Arc::clone(&stats))?;
    Ok(EndpointHandle::spawn(endpoint, events, stats, local_addr))
}

/// 在当前运行时中启动连接端点。
///
/// `address` 形如 `[iface;]host:port`；连接建立后整条流交给 `handler.serve`，
/// 处理器返回即视为连接断开，端点随后退避并重新解析、重连。
pub fn spawn_connector<H: ConnectionHandler>(
    address: &str,
    options: EndpointOptions,
    handler: Arc<H>,
) -> Result<EndpointHandle, ConfigError> {
    let (sender, events) = mailbox::<ConnectorEvent>();
    let socket = TokioSocket::for_connector(poster(&sender, ConnectorEvent::Socket));
    let local_addr = socket.local_addr_slot();
    let parts = ConnectorParts {
        socket,
        timer: TokioTimer::new(poster(&sender, ConnectorEvent::Retry)),
        resolver: TokioResolver::new(poster(&sender, ConnectorEvent::Resolver)),
        session: Connection::new(handler, poster(&sender, ConnectorEvent::Session)),
    };
    let stats = EndpointStats::shared();
    let endpoint: TcpConnectorEndpoint<H> =
        ConnectorEndpoint::create(address, options, parts, Arc::clone(&stats))?;
    Ok(EndpointHandle::spawn(endpoint, events, stats, local_addr))
}

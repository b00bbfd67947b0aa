//! 监听端点：维持一个监听套接字，并持续接受入站连接。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 把“打开 → 绑定 → 监听 → 循环接受”的异步流程与失败重试、级联关闭收敛到一个状态机；
//! - 单个连接的故障只回收该连接本身，监听端点只会因显式的停止请求而关闭。
//!
//! ## 状态迁移（How）
//! ```text
//! Idle ──start──▶ Active ◀───────────────────────────────┐
//!   │ bind/listen 失败                                   │
//!   ▼                                                    │
//! Closing ──socket Stopped──▶ Waiting ──Timeout──▶ StoppingBackoff ──timer Stopped──┘
//!
//! stop: 任意状态 ──▶ StoppingAcceptor ──▶ StoppingSocket ──▶ StoppingConnections ──▶ Idle(终态)
//! ```
//! - 打开套接字失败时没有需要回收的资源，直接进入 `Waiting`；
//! - `Active` 期间始终恰好有一个待接受子状态机；它报告 `Accepted` 后所有权转入已建立集合，
//!   紧接着创建新的待接受子状态机，监听套接字不会出现没有接受者的空窗。
//!
//! ## 契约（What）
//! - 关闭顺序严格为：停止定时器 → 停止并回收待接受子状态机 → 停止监听套接字 →
//!   向全部已建立连接请求停止 → 集合清空后报告停止；
//! - 与当前状态不匹配的事件属于契约违例，立即终止。
//!
//! ## 注意事项（Trade-offs）
//! - 已回收的待接受子状态机在空闲后仍可能有排队中的 `Stopped` 事件，关闭阶段会忽略这些
//!   迟到事件；连接标识单调分配，未分配过的标识依旧视为契约违例。

use std::collections::HashMap;
use std::io;

use tracing::{debug, info, trace, warn};

use crate::address::{AddressFamily, BindAddress};
use crate::backoff::Backoff;
use crate::collaborator::{
    Acceptor, AcceptorFactory, ConnectionId, ListenerEvent, RetryTimer, SessionEvent, SocketEvent,
    StreamSocket, TimerEvent,
};
use crate::endpoint::{Endpoint, EndpointRole};
use crate::error::{ConfigError, contract_violation};
use crate::fsm::{Fsm, FsmPhase, Route};
use crate::options::EndpointOptions;
use crate::stats::{EndpointHost, Statistic};

const MACHINE: &str = "listener endpoint";

/// 监听端点的内部状态。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ListenerState {
    Idle,
    Active,
    /// bind/listen 失败后等待套接字停止。
    Closing,
    /// 退避定时器计时中。
    Waiting,
    /// 退避超时后等待定时器停止，随后重新执行完整的打开流程。
    StoppingBackoff,
    StoppingAcceptor,
    StoppingSocket,
    StoppingConnections,
}

/// 监听端点独占的协作者。
pub struct ListenerParts<S, T, F> {
    pub socket: S,
    pub timer: T,
    pub acceptors: F,
}

/// 监听端点。
pub struct ListenerEndpoint<S, T, F: AcceptorFactory, H> {
    fsm: Fsm,
    state: ListenerState,
    address: String,
    bind: BindAddress,
    options: EndpointOptions,
    socket: S,
    retry: Backoff<T>,
    acceptors: F,
    pending: Option<(ConnectionId, F::Acceptor)>,
    established: HashMap<ConnectionId, F::Acceptor>,
    next_id: u64,
    host: H,
}

impl<S, T, F, H> ListenerEndpoint<S, T, F, H>
where
    S: StreamSocket,
    T: RetryTimer,
    F: AcceptorFactory,
    F::Acceptor: Acceptor<Socket = S>,
    H: EndpointHost,
{
    /// 校验地址、接管协作者并立即开始监听。
    ///
    /// 地址非法时返回 [`ConfigError`]，此时状态机尚未启动，协作者随返回值一并释放。
    /// 运行期的 bind/listen 失败不会出现在这里，而是进入退避重试。
    pub fn create(
        address: &str,
        options: EndpointOptions,
        parts: ListenerParts<S, T, F>,
        host: H,
    ) -> Result<Self, ConfigError> {
        let bind = BindAddress::parse(address, options.ipv4_only)?;
        let retry = Backoff::new(
            parts.timer,
            options.reconnect_interval(),
            options.reconnect_interval_max(),
        );
        let mut endpoint = Self {
            fsm: Fsm::new(MACHINE),
            state: ListenerState::Idle,
            address: address.to_owned(),
            bind,
            options,
            socket: parts.socket,
            retry,
            acceptors: parts.acceptors,
            pending: None,
            established: HashMap::new(),
            next_id: 0,
            host,
        };
        endpoint.fsm.start();
        debug!(endpoint = %endpoint.address, "listener endpoint created");
        endpoint.start_listening();
        Ok(endpoint)
    }

    /// 事件入口：运行期交给处理器，停止后交给关闭例程。
    pub fn handle(&mut self, event: ListenerEvent) {
        match self.fsm.route(&event) {
            Route::Handler => self.on_event(event),
            Route::Shutdown => self.on_shutdown(event),
        }
    }

    /// 请求停止；非运行态下为空操作。
    pub fn stop(&mut self) {
        if !self.fsm.begin_stop() {
            return;
        }
        debug!(endpoint = %self.address, state = ?self.state, "stopping listener endpoint");
        self.retry.stop();
        if let Some((_, acceptor)) = self.pending.as_mut() {
            acceptor.stop();
        }
        self.state = ListenerState::StoppingAcceptor;
        self.advance_shutdown();
    }

    pub fn state(&self) -> ListenerState {
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

    pub fn bind_address(&self) -> &BindAddress {
        &self.bind
    }

    /// 当前待接受子状态机的标识。
    pub fn pending_acceptor(&self) -> Option<ConnectionId> {
        self.pending.as_ref().map(|(id, _)| *id)
    }

    pub fn established_count(&self) -> usize {
        self.established.len()
    }

    pub fn is_established(&self, id: ConnectionId) -> bool {
        self.established.contains_key(&id)
    }

    /// 自创建以来退避启动的次数。
    pub fn retry_attempts(&self) -> u32 {
        self.retry.attempts()
    }

    pub fn socket(&self) -> &S {
        &self.socket
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    fn on_event(&mut self, event: ListenerEvent) {
        match (self.state, event) {
            (ListenerState::Active, ListenerEvent::Connection { id, event }) => {
                self.on_connection(id, event)
            }
            (ListenerState::Closing, ListenerEvent::Socket(SocketEvent::Shutdown)) => {}
            (ListenerState::Closing, ListenerEvent::Socket(SocketEvent::Stopped)) => {
                self.wait_before_retry()
            }
            (ListenerState::Waiting, ListenerEvent::Retry(TimerEvent::Timeout)) => {
                self.retry.stop();
                self.state = ListenerState::StoppingBackoff;
            }
            (ListenerState::StoppingBackoff, ListenerEvent::Retry(TimerEvent::Stopped)) => {
                self.start_listening()
            }
            (state, event) => contract_violation(MACHINE, &state, &event),
        }
    }

    fn on_connection(&mut self, id: ConnectionId, event: SessionEvent) {
        if self.pending_acceptor() == Some(id) {
            if event != SessionEvent::Accepted {
                contract_violation(MACHINE, &self.state, &(id, event));
            }
            if let Some((id, acceptor)) = self.pending.take() {
                self.established.insert(id, acceptor);
            }
            self.host.record(Statistic::AcceptedConnections, 1);
            debug!(
                endpoint = %self.address,
                connection = id.0,
                established = self.established.len(),
                "connection accepted"
            );
            self.start_acceptor();
            return;
        }

        match event {
            SessionEvent::Error => match self.established.get_mut(&id) {
                Some(connection) => {
                    connection.stop();
                    self.host.record(Statistic::BrokenConnections, 1);
                    debug!(endpoint = %self.address, connection = id.0, "connection broken");
                }
                None => contract_violation(MACHINE, &self.state, &(id, event)),
            },
            SessionEvent::Stopped => match self.established.remove(&id) {
                Some(connection) => debug_assert!(connection.is_idle()),
                None => contract_violation(MACHINE, &self.state, &(id, event)),
            },
            SessionEvent::Accepted => contract_violation(MACHINE, &self.state, &(id, event)),
        }
    }

    fn start_listening(&mut self) {
        let addr = self.bind.socket_addr(self.options.ipv4_only);
        if let Err(error) = self.socket.start(AddressFamily::of(&addr.ip())) {
            warn!(
                endpoint = %self.address,
                %addr,
                %error,
                "failed to open listening socket, backing off"
            );
            self.host.set_error(error.kind());
            self.wait_before_retry();
            return;
        }
        if let Err(error) = self.socket.bind(addr) {
            self.close_after_failure("bind", error);
            return;
        }
        if let Err(error) = self.socket.listen(self.options.backlog) {
            self.close_after_failure("listen", error);
            return;
        }

        self.host.clear_error();
        self.state = ListenerState::Active;
        info!(endpoint = %self.address, %addr, backlog = self.options.backlog, "listening");
        self.start_acceptor();
    }

    fn close_after_failure(&mut self, operation: &'static str, error: io::Error) {
        warn!(
            endpoint = %self.address,
            operation,
            %error,
            "listening socket setup failed, closing before retry"
        );
        self.host.record(Statistic::BindErrors, 1);
        self.host.set_error(error.kind());
        self.socket.stop();
        self.state = ListenerState::Closing;
    }

    fn wait_before_retry(&mut self) {
        let interval = self.retry.start();
        debug!(endpoint = %self.address, ?interval, "waiting before next listen attempt");
        self.state = ListenerState::Waiting;
    }

    fn start_acceptor(&mut self) {
        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        let mut acceptor = self.acceptors.create(id);
        acceptor.start(&mut self.socket);
        self.pending = Some((id, acceptor));
    }

    fn on_shutdown(&mut self, event: ListenerEvent) {
        match event {
            ListenerEvent::Retry(_)
            | ListenerEvent::Socket(SocketEvent::Shutdown | SocketEvent::Stopped) => {}
            ListenerEvent::Socket(_) => contract_violation(MACHINE, &self.state, &event),
            ListenerEvent::Connection { id, event } => self.on_connection_while_stopping(id, event),
        }
        self.advance_shutdown();
    }

    fn on_connection_while_stopping(&mut self, id: ConnectionId, event: SessionEvent) {
        // 正在回收的待接受子状态机：是否完成只看空闲状态。
        if self.pending_acceptor() == Some(id) {
            return;
        }
        if self.established.contains_key(&id) {
            match event {
                SessionEvent::Stopped => {
                    self.established.remove(&id);
                }
                SessionEvent::Error => {}
                SessionEvent::Accepted => contract_violation(MACHINE, &self.state, &(id, event)),
            }
            return;
        }
        if id.0 < self.next_id {
            trace!(
                endpoint = %self.address,
                connection = id.0,
                ?event,
                "late event from a retired connection"
            );
            return;
        }
        contract_violation(MACHINE, &self.state, &(id, event));
    }

    fn advance_shutdown(&mut self) {
        loop {
            match self.state {
                ListenerState::StoppingAcceptor => {
                    let acceptor_busy = self
                        .pending
                        .as_ref()
                        .is_some_and(|(_, acceptor)| !acceptor.is_idle());
                    if acceptor_busy || !self.retry.is_idle() {
                        return;
                    }
                    self.pending = None;
                    self.socket.stop();
                    self.state = ListenerState::StoppingSocket;
                }
                ListenerState::StoppingSocket => {
                    if !self.socket.is_idle() {
                        return;
                    }
                    for connection in self.established.values_mut() {
                        connection.stop();
                    }
                    self.state = ListenerState::StoppingConnections;
                }
                ListenerState::StoppingConnections => {
                    if !self.established.is_empty() {
                        return;
                    }
                    self.state = ListenerState::Idle;
                    self.fsm.finish_stop();
                    self.host.stopped();
                    info!(endpoint = %self.address, "listener endpoint stopped");
                    return;
                }
                state => contract_violation(MACHINE, &state, &"advance shutdown"),
            }
        }
    }
}

impl<S, T, F, H> Endpoint for ListenerEndpoint<S, T, F, H>
where
    S: StreamSocket,
    T: RetryTimer,
    F: AcceptorFactory,
    F::Acceptor: Acceptor<Socket = S>,
    H: EndpointHost,
{
    fn role(&self) -> EndpointRole {
        EndpointRole::Listener
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn stop(&mut self) {
        ListenerEndpoint::stop(self);
    }

    fn is_stopped(&self) -> bool {
        self.fsm.phase() == FsmPhase::Stopped
    }

    fn destroy(self: Box<Self>) {
        if self.fsm.phase() != FsmPhase::Stopped {
            contract_violation(MACHINE, &self.state, &"destroy");
        }
        debug!(endpoint = %self.address, "listener endpoint destroyed");
    }
}

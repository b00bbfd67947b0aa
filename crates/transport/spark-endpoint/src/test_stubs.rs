//! 协作者的记录型桩实现，供单元测试与场景测试驱动端点状态机。
//!
//! # 教案式说明
//! - **意图（Why）**：端点一旦创建便独占协作者，测试无法再直接访问它们；每个桩因此与一个
//!   共享探针（`Rc<RefCell<_>>`）配对，测试通过探针检查调用记录、注入失败、完成异步停止；
//! - **契约（What）**：
//!   - 桩的 `stop` 只把对象置为“停止中”，此时仍非空闲；测试调用探针的 `complete_stop`
//!     之后对象才变为空闲，再由测试投递相应的 `Stopped` 事件；
//!   - 失败注入为一次性：`fail_next_*` 只影响下一次调用；
//! - **风险（Trade-offs）**：桩基于 `Rc`，仅适用于单线程测试。

use std::cell::RefCell;
use std::io;
use std::net::SocketAddr;
use std::rc::Rc;
use std::time::Duration;

use crate::address::AddressFamily;
use crate::collaborator::{
    Acceptor, AcceptorFactory, ConnectionId, NameResolver, RetryTimer, Session, StreamSocket,
};

#[derive(Debug, Default)]
struct Lifecycle {
    running: bool,
    stopping: bool,
}

impl Lifecycle {
    fn start(&mut self) {
        self.running = true;
        self.stopping = false;
    }

    fn stop(&mut self) {
        if self.running {
            self.stopping = true;
        }
    }

    fn complete_stop(&mut self) -> bool {
        if !self.stopping {
            return false;
        }
        self.running = false;
        self.stopping = false;
        true
    }

    fn is_idle(&self) -> bool {
        !self.running
    }
}

/// 套接字桩收到的调用。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SocketCall {
    Start(AddressFamily),
    SendBuffer(usize),
    RecvBuffer(usize),
    Bind(SocketAddr),
    Listen(u32),
    Connect(SocketAddr),
    Stop,
}

#[derive(Debug, Default)]
struct SocketState {
    lifecycle: Lifecycle,
    calls: Vec<SocketCall>,
    fail_start: Option<io::ErrorKind>,
    fail_bind: Option<io::ErrorKind>,
    fail_listen: Option<io::ErrorKind>,
    fail_connect: Option<io::ErrorKind>,
    fail_buffers: Option<io::ErrorKind>,
    last_error: Option<io::ErrorKind>,
}

/// 套接字桩的探针。
#[derive(Clone, Debug, Default)]
pub struct SocketProbe(Rc<RefCell<SocketState>>);

impl SocketProbe {
    pub fn calls(&self) -> Vec<SocketCall> {
        self.0.borrow().calls.clone()
    }

    pub fn count(&self, matches: impl Fn(&SocketCall) -> bool) -> usize {
        self.0.borrow().calls.iter().filter(|call| matches(call)).count()
    }

    pub fn fail_next_start(&self, kind: io::ErrorKind) {
        self.0.borrow_mut().fail_start = Some(kind);
    }

    pub fn fail_next_bind(&self, kind: io::ErrorKind) {
        self.0.borrow_mut().fail_bind = Some(kind);
    }

    pub fn fail_next_listen(&self, kind: io::ErrorKind) {
        self.0.borrow_mut().fail_listen = Some(kind);
    }

    pub fn fail_next_connect(&self, kind: io::ErrorKind) {
        self.0.borrow_mut().fail_connect = Some(kind);
    }

    /// 让随后的缓冲区设置全部失败。
    pub fn fail_buffers(&self, kind: io::ErrorKind) {
        self.0.borrow_mut().fail_buffers = Some(kind);
    }

    /// 设置异步失败的原因，模拟 `SocketEvent::Error` 之前套接字记录的错误。
    pub fn set_last_error(&self, kind: io::ErrorKind) {
        self.0.borrow_mut().last_error = Some(kind);
    }

    pub fn is_stopping(&self) -> bool {
        self.0.borrow().lifecycle.stopping
    }

    pub fn is_idle(&self) -> bool {
        self.0.borrow().lifecycle.is_idle()
    }

    /// 完成停止；对象此前不在停止中时返回 `false`。
    pub fn complete_stop(&self) -> bool {
        self.0.borrow_mut().lifecycle.complete_stop()
    }
}

/// 记录型套接字桩。
#[derive(Debug)]
pub struct StubSocket {
    probe: SocketProbe,
}

impl StubSocket {
    pub fn new() -> (Self, SocketProbe) {
        let probe = SocketProbe::default();
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }

    fn call(&self, call: SocketCall, failure: Option<io::ErrorKind>) -> io::Result<()> {
        self.probe.0.borrow_mut().calls.push(call);
        match failure {
            Some(kind) => Err(io::Error::new(kind, "injected failure")),
            None => Ok(()),
        }
    }
}

impl StreamSocket for StubSocket {
    fn start(&mut self, family: AddressFamily) -> io::Result<()> {
        let failure = self.probe.0.borrow_mut().fail_start.take();
        self.call(SocketCall::Start(family), failure)?;
        self.probe.0.borrow_mut().lifecycle.start();
        Ok(())
    }

    fn set_send_buffer(&mut self, bytes: usize) -> io::Result<()> {
        let failure = self.probe.0.borrow().fail_buffers;
        self.call(SocketCall::SendBuffer(bytes), failure)
    }

    fn set_recv_buffer(&mut self, bytes: usize) -> io::Result<()> {
        let failure = self.probe.0.borrow().fail_buffers;
        self.call(SocketCall::RecvBuffer(bytes), failure)
    }

    fn bind(&mut self, addr: SocketAddr) -> io::Result<()> {
        let failure = self.probe.0.borrow_mut().fail_bind.take();
        self.call(SocketCall::Bind(addr), failure)
    }

    fn listen(&mut self, backlog: u32) -> io::Result<()> {
        let failure = self.probe.0.borrow_mut().fail_listen.take();
        self.call(SocketCall::Listen(backlog), failure)
    }

    fn connect(&mut self, addr: SocketAddr) -> io::Result<()> {
        let failure = self.probe.0.borrow_mut().fail_connect.take();
        self.call(SocketCall::Connect(addr), failure)
    }

    fn stop(&mut self) {
        let mut state = self.probe.0.borrow_mut();
        state.calls.push(SocketCall::Stop);
        state.lifecycle.stop();
    }

    fn is_idle(&self) -> bool {
        self.probe.is_idle()
    }

    fn last_error(&self) -> Option<io::ErrorKind> {
        self.probe.0.borrow().last_error
    }
}

#[derive(Debug, Default)]
struct TimerState {
    lifecycle: Lifecycle,
    started: Vec<Duration>,
    stops: usize,
}

/// 定时器桩的探针。
#[derive(Clone, Debug, Default)]
pub struct TimerProbe(Rc<RefCell<TimerState>>);

impl TimerProbe {
    /// 每次启动时使用的间隔。
    pub fn intervals(&self) -> Vec<Duration> {
        self.0.borrow().started.clone()
    }

    pub fn stops(&self) -> usize {
        self.0.borrow().stops
    }

    pub fn is_running(&self) -> bool {
        self.0.borrow().lifecycle.running
    }

    pub fn is_idle(&self) -> bool {
        self.0.borrow().lifecycle.is_idle()
    }

    pub fn complete_stop(&self) -> bool {
        self.0.borrow_mut().lifecycle.complete_stop()
    }
}

#[derive(Debug)]
pub struct StubTimer {
    probe: TimerProbe,
}

impl StubTimer {
    pub fn new() -> (Self, TimerProbe) {
        let probe = TimerProbe::default();
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl RetryTimer for StubTimer {
    fn start(&mut self, timeout: Duration) {
        let mut state = self.probe.0.borrow_mut();
        state.started.push(timeout);
        state.lifecycle.start();
    }

    fn stop(&mut self) {
        let mut state = self.probe.0.borrow_mut();
        state.stops += 1;
        state.lifecycle.stop();
    }

    fn is_idle(&self) -> bool {
        self.probe.is_idle()
    }
}

#[derive(Debug, Default)]
struct ResolverState {
    lifecycle: Lifecycle,
    lookups: Vec<(String, bool)>,
}

/// 解析器桩的探针。
#[derive(Clone, Debug, Default)]
pub struct ResolverProbe(Rc<RefCell<ResolverState>>);

impl ResolverProbe {
    /// 每次启动时的 `(host, ipv4_only)`。
    pub fn lookups(&self) -> Vec<(String, bool)> {
        self.0.borrow().lookups.clone()
    }

    pub fn is_idle(&self) -> bool {
        self.0.borrow().lifecycle.is_idle()
    }

    pub fn is_stopping(&self) -> bool {
        self.0.borrow().lifecycle.stopping
    }

    pub fn complete_stop(&self) -> bool {
        self.0.borrow_mut().lifecycle.complete_stop()
    }
}

#[derive(Debug)]
pub struct StubResolver {
    probe: ResolverProbe,
}

impl StubResolver {
    pub fn new() -> (Self, ResolverProbe) {
        let probe = ResolverProbe::default();
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }
}

impl NameResolver for StubResolver {
    fn start(&mut self, host: &str, ipv4_only: bool) {
        let mut state = self.probe.0.borrow_mut();
        state.lookups.push((host.to_owned(), ipv4_only));
        state.lifecycle.start();
    }

    fn stop(&mut self) {
        self.probe.0.borrow_mut().lifecycle.stop();
    }

    fn is_idle(&self) -> bool {
        self.probe.is_idle()
    }
}

#[derive(Debug, Default)]
struct ConnectionState {
    lifecycle: Lifecycle,
    starts: usize,
    stops: usize,
}

/// 连接子状态机桩的探针。
#[derive(Clone, Debug, Default)]
pub struct ConnectionProbe(Rc<RefCell<ConnectionState>>);

impl ConnectionProbe {
    pub fn starts(&self) -> usize {
        self.0.borrow().starts
    }

    /// 收到的停止请求次数（包括对空闲对象的请求）。
    pub fn stops(&self) -> usize {
        self.0.borrow().stops
    }

    pub fn is_idle(&self) -> bool {
        self.0.borrow().lifecycle.is_idle()
    }

    pub fn is_stopping(&self) -> bool {
        self.0.borrow().lifecycle.stopping
    }

    pub fn complete_stop(&self) -> bool {
        self.0.borrow_mut().lifecycle.complete_stop()
    }
}

/// 同时扮演监听端接受者与连接端会话的子状态机桩。
#[derive(Debug)]
pub struct StubConnection {
    probe: ConnectionProbe,
}

impl StubConnection {
    pub fn new() -> (Self, ConnectionProbe) {
        let probe = ConnectionProbe::default();
        (
            Self {
                probe: probe.clone(),
            },
            probe,
        )
    }

    fn begin(&mut self) {
        let mut state = self.probe.0.borrow_mut();
        state.starts += 1;
        state.lifecycle.start();
    }

    fn end(&mut self) {
        let mut state = self.probe.0.borrow_mut();
        state.stops += 1;
        state.lifecycle.stop();
    }
}

impl Acceptor for StubConnection {
    type Socket = StubSocket;

    fn start(&mut self, _listener: &mut StubSocket) {
        self.begin();
    }

    fn stop(&mut self) {
        self.end();
    }

    fn is_idle(&self) -> bool {
        self.probe.is_idle()
    }
}

impl Session for StubConnection {
    type Socket = StubSocket;

    fn start(&mut self, _socket: &mut StubSocket) {
        self.begin();
    }

    fn stop(&mut self) {
        self.end();
    }

    fn is_idle(&self) -> bool {
        self.probe.is_idle()
    }
}

/// 接受者工厂桩：按创建顺序记录每个接受者的探针。
#[derive(Clone, Debug, Default)]
pub struct StubAcceptors {
    created: Rc<RefCell<Vec<(ConnectionId, ConnectionProbe)>>>,
}

impl StubAcceptors {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已创建的接受者数量。
    pub fn created(&self) -> usize {
        self.created.borrow().len()
    }

    pub fn probe(&self, id: ConnectionId) -> Option<ConnectionProbe> {
        self.created
            .borrow()
            .iter()
            .find(|(created, _)| *created == id)
            .map(|(_, probe)| probe.clone())
    }

    /// 最近创建的接受者。
    pub fn latest(&self) -> Option<(ConnectionId, ConnectionProbe)> {
        self.created.borrow().last().cloned()
    }
}

impl AcceptorFactory for StubAcceptors {
    type Acceptor = StubConnection;

    fn create(&mut self, id: ConnectionId) -> StubConnection {
        let (connection, probe) = StubConnection::new();
        self.created.borrow_mut().push((id, probe));
        connection
    }
}

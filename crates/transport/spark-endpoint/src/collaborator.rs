//! 端点依赖的协作者契约与它们回送的事件。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 端点只负责编排：套接字、定时器、DNS 解析器与每连接子状态机都由外部实现，
//!   端点通过这里的 trait 下发动作，并通过类型化事件接收完成通知；
//! - 事件来源由枚举变体静态表达（[`ListenerEvent`]/[`ConnectorEvent`]），不再依赖整数标签
//!   推断来源。
//!
//! ## 契约（What）
//! - 所有动作都是“发出即返回”的：`start`/`stop`/`connect` 不阻塞，完成情况稍后以事件
//!   形式到达；只有能够同步判定的失败（打开、绑定、监听、发起连接）通过返回值报告；
//! - `stop` 对空闲对象是空操作且**不会**产生 `Stopped` 事件；对非空闲对象，实现必须在
//!   `is_idle()` 变为 `true` 之后投递恰好一个 `Stopped` 事件；
//! - 空闲（idle）意味着对象已释放全部资源，且不会再发出任何事件。
//!
//! ## 注意事项（Trade-offs）
//! - 监听套接字上的“可接受”就绪事件由 [`Acceptor`] 自行消费，不会到达端点。

use core::time::Duration;
use std::io;
use std::net::{IpAddr, SocketAddr};

use crate::address::AddressFamily;

/// 非阻塞流套接字。
pub trait StreamSocket {
    /// 打开指定地址族的流套接字。
    fn start(&mut self, family: AddressFamily) -> io::Result<()>;
    /// 设置发送缓冲区大小。
    fn set_send_buffer(&mut self, bytes: usize) -> io::Result<()>;
    /// 设置接收缓冲区大小。
    fn set_recv_buffer(&mut self, bytes: usize) -> io::Result<()>;
    fn bind(&mut self, addr: SocketAddr) -> io::Result<()>;
    fn listen(&mut self, backlog: u32) -> io::Result<()>;
    /// 发起非阻塞连接；结果以 [`SocketEvent::Connected`] 或 [`SocketEvent::Error`] 到达。
    fn connect(&mut self, addr: SocketAddr) -> io::Result<()>;
    fn stop(&mut self);
    fn is_idle(&self) -> bool;
    /// 最近一次异步失败的错误种类，用于 [`SocketEvent::Error`] 之后记录原因。
    fn last_error(&self) -> Option<io::ErrorKind>;
}

/// 退避使用的原始定时器。超时后定时器保持非空闲，需要 `stop` 才会回到空闲。
pub trait RetryTimer {
    fn start(&mut self, timeout: Duration);
    fn stop(&mut self);
    fn is_idle(&self) -> bool;
}

/// DNS 解析器。结果随 [`ResolverEvent::Done`] 一起送达。
///
/// 投递 `Done` 之后解析器仍处于非空闲状态，直到端点显式调用 `stop` 并收到
/// [`ResolverEvent::Stopped`]；“结果已送达”与“解析器已空闲”是两个独立的前提。
pub trait NameResolver {
    fn start(&mut self, host: &str, ipv4_only: bool);
    fn stop(&mut self);
    fn is_idle(&self) -> bool;
}

/// 监听端的“等待接受”子状态机；接受成功后原地转为已建立连接。
pub trait Acceptor {
    type Socket;

    /// 在监听套接字上等待下一个入站连接。
    fn start(&mut self, listener: &mut Self::Socket);
    fn stop(&mut self);
    fn is_idle(&self) -> bool;
}

/// 连接端的已建立连接子状态机，可在多轮连接之间重复启动。
pub trait Session {
    type Socket;

    /// 接管已经连上的套接字。
    fn start(&mut self, socket: &mut Self::Socket);
    fn stop(&mut self);
    fn is_idle(&self) -> bool;
}

/// 监听端为每个接受槽位分配的连接标识。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

/// 为监听端创建新的接受子状态机。
pub trait AcceptorFactory {
    type Acceptor: Acceptor;

    fn create(&mut self, id: ConnectionId) -> Self::Acceptor;
}

impl<F, A> AcceptorFactory for F
where
    F: FnMut(ConnectionId) -> A,
    A: Acceptor,
{
    type Acceptor = A;

    fn create(&mut self, id: ConnectionId) -> A {
        self(id)
    }
}

/// 套接字事件。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SocketEvent {
    Connected,
    Error,
    /// 半关闭确认，端点在停止套接字时忽略它。
    Shutdown,
    Stopped,
}

/// 定时器事件。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum TimerEvent {
    Timeout,
    Stopped,
}

/// 解析器事件。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ResolverEvent {
    Done(Result<IpAddr, io::ErrorKind>),
    Stopped,
}

/// 每连接子状态机事件。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SessionEvent {
    Accepted,
    Error,
    Stopped,
}

/// 投递给监听端点的事件。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ListenerEvent {
    Socket(SocketEvent),
    Retry(TimerEvent),
    Connection {
        id: ConnectionId,
        event: SessionEvent,
    },
}

/// 投递给连接端点的事件。
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ConnectorEvent {
    Socket(SocketEvent),
    Retry(TimerEvent),
    Resolver(ResolverEvent),
    Session(SessionEvent),
}

//! 基于 `socket2` 与 Tokio 的端点套接字。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 端点按“打开 → 设置选项 → 绑定 → 监听/连接”的顺序同步下发动作，`tokio::net`
//!   的高层类型把这些步骤合并在一个调用中，无法逐步报告失败；
//! - 因此打开、选项与绑定阶段使用 `socket2::Socket`，监听成功后转换为 Tokio 的
//!   [`TcpListener`]，发起连接时转换为 [`TcpSocket`] 并在后台任务中等待完成。
//!
//! ## 契约（What）
//! - `start` 成功后套接字进入非空闲，直到 `stop`；`stop` 同步释放资源并投递一次
//!   [`SocketEvent::Stopped`]；
//! - 连接完成以 [`SocketEvent::Connected`] / [`SocketEvent::Error`] 投递，失败原因可经
//!   `last_error` 读取；
//! - IPv6 套接字关闭 `IPV6_V6ONLY`，通配地址 `::` 因此同时接收 IPv4 映射连接。
//!
//! ## 注意事项（Trade-offs）
//! - 监听套接字启用 `SO_REUSEADDR`，重启后可立即重新绑定处于 `TIME_WAIT` 的端口；
//!   但它不会放宽与其他正在监听的套接字之间的冲突。

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use spark_endpoint::{AddressFamily, SocketEvent, StreamSocket};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::task::JoinHandle;

use crate::error::{BIND, CONFIGURE, CONNECT, LISTEN, OperationKind, annotate, not_open};
use crate::mailbox::Post;

/// 在驱动任务与观测方之间共享的本地地址槽位。
pub(crate) type LocalAddrSlot = Arc<Mutex<Option<SocketAddr>>>;

/// 端点使用的非阻塞 TCP 套接字。
pub struct TokioSocket {
    post: Post<SocketEvent>,
    reuse_address: bool,
    raw: Option<Socket>,
    listener: Option<Arc<TcpListener>>,
    stream: Arc<Mutex<Option<TcpStream>>>,
    connecting: Option<JoinHandle<()>>,
    last_error: Arc<Mutex<Option<io::ErrorKind>>>,
    local_addr: LocalAddrSlot,
    active: bool,
}

impl TokioSocket {
    fn new(post: Post<SocketEvent>, reuse_address: bool) -> Self {
        Self {
            post,
            reuse_address,
            raw: None,
            listener: None,
            stream: Arc::new(Mutex::new(None)),
            connecting: None,
            last_error: Arc::new(Mutex::new(None)),
            local_addr: Arc::new(Mutex::new(None)),
            active: false,
        }
    }

    /// 监听端使用的套接字：启用 `SO_REUSEADDR`。
    pub(crate) fn for_listener(post: Post<SocketEvent>) -> Self {
        Self::new(post, true)
    }

    pub(crate) fn for_connector(post: Post<SocketEvent>) -> Self {
        Self::new(post, false)
    }

    /// 监听成功后的 Tokio 监听器，供接受子状态机共享。
    pub fn listener(&self) -> Option<Arc<TcpListener>> {
        self.listener.clone()
    }

    /// 取走已建立的连接流；每次连接只能被取走一次。
    pub fn take_stream(&mut self) -> Option<TcpStream> {
        self.stream.lock().take()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }

    pub(crate) fn local_addr_slot(&self) -> LocalAddrSlot {
        Arc::clone(&self.local_addr)
    }

    fn raw(&self, kind: OperationKind) -> io::Result<&Socket> {
        self.raw.as_ref().ok_or_else(|| not_open(kind))
    }

    fn release(&mut self) {
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
        self.raw = None;
        self.listener = None;
        self.stream.lock().take();
        self.local_addr.lock().take();
    }
}

impl StreamSocket for TokioSocket {
    fn start(&mut self, family: AddressFamily) -> io::Result<()> {
        self.release();
        let domain = match family {
            AddressFamily::Ipv4 => Domain::IPV4,
            AddressFamily::Ipv6 => Domain::IPV6,
        };
        let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))
            .map_err(|error| annotate(CONFIGURE, error))?;
        socket
            .set_nonblocking(true)
            .map_err(|error| annotate(CONFIGURE, error))?;
        if family == AddressFamily::Ipv6 {
            socket
                .set_only_v6(false)
                .map_err(|error| annotate(CONFIGURE, error))?;
        }
        if self.reuse_address {
            socket
                .set_reuse_address(true)
                .map_err(|error| annotate(CONFIGURE, error))?;
        }
        self.raw = Some(socket);
        self.last_error.lock().take();
        self.active = true;
        Ok(())
    }

    fn set_send_buffer(&mut self, bytes: usize) -> io::Result<()> {
        self.raw(CONFIGURE)?
            .set_send_buffer_size(bytes)
            .map_err(|error| annotate(CONFIGURE, error))
    }

    fn set_recv_buffer(&mut self, bytes: usize) -> io::Result<()> {
        self.raw(CONFIGURE)?
            .set_recv_buffer_size(bytes)
            .map_err(|error| annotate(CONFIGURE, error))
    }

    fn bind(&mut self, addr: SocketAddr) -> io::Result<()> {
        self.raw(BIND)?
            .bind(&addr.into())
            .map_err(|error| annotate(BIND, error))
    }

    fn listen(&mut self, backlog: u32) -> io::Result<()> {
        let backlog = i32::try_from(backlog).unwrap_or(i32::MAX);
        self.raw(LISTEN)?
            .listen(backlog)
            .map_err(|error| annotate(LISTEN, error))?;
        let socket = self.raw.take().ok_or_else(|| not_open(LISTEN))?;
        let listener =
            TcpListener::from_std(socket.into()).map_err(|error| annotate(LISTEN, error))?;
        *self.local_addr.lock() = listener.local_addr().ok();
        self.listener = Some(Arc::new(listener));
        Ok(())
    }

    fn connect(&mut self, addr: SocketAddr) -> io::Result<()> {
        let socket = self.raw.take().ok_or_else(|| not_open(CONNECT))?;
        let socket = TcpSocket::from_std_stream(socket.into());
        let post = Arc::clone(&self.post);
        let slot = Arc::clone(&self.stream);
        let last_error = Arc::clone(&self.last_error);
        let local_addr = Arc::clone(&self.local_addr);
        self.connecting = Some(tokio::spawn(async move {
            match socket.connect(addr).await {
                Ok(stream) => {
                    *local_addr.lock() = stream.local_addr().ok();
                    *slot.lock() = Some(stream);
                    post(SocketEvent::Connected);
                }
                Err(error) => {
                    let error = annotate(CONNECT, error);
                    *last_error.lock() = Some(error.kind());
                    post(SocketEvent::Error);
                }
            }
        }));
        Ok(())
    }

    fn stop(&mut self) {
        self.release();
        if self.active {
            self.active = false;
            (self.post)(SocketEvent::Stopped);
        }
    }

    fn is_idle(&self) -> bool {
        !self.active
    }

    fn last_error(&self) -> Option<io::ErrorKind> {
        *self.last_error.lock()
    }
}

impl Drop for TokioSocket {
    fn drop(&mut self) {
        if let Some(task) = self.connecting.take() {
            task.abort();
        }
    }
}

//! 每连接子状态机：等待接受或接管已连上的流，并把它交给业务处理器。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 端点只关心连接“何时接受”“何时出错”“何时停稳”，读写交给实现了
//!   [`ConnectionHandler`] 的业务代码；
//! - 同一个 [`Connection`] 既可作为监听端的接受子状态机，也可作为连接端可复用的会话。
//!
//! ## 契约（What）
//! - 接受成功投递 [`SessionEvent::Accepted`]；处理器返回（无论成功或失败）后投递一次
//!   [`SessionEvent::Error`]，表示连接已不可用，由端点决定回收；
//! - `stop` 取消后台任务、关闭流，并在非空闲时投递一次 [`SessionEvent::Stopped`]；
//! - 接受失败（例如文件描述符耗尽）只记录日志，短暂停顿后继续等待，不会向端点报告错误。

use core::time::Duration;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use spark_endpoint::{
    Acceptor, AcceptorFactory, ConnectionId, ListenerEvent, Session, SessionEvent,
};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::{ACCEPT, SERVE, annotate};
use crate::mailbox::{Post, poster};
use crate::socket::TokioSocket;

/// 接受失败后的停顿，避免在资源耗尽时空转。
const ACCEPT_RETRY_PAUSE: Duration = Duration::from_millis(50);

/// 业务连接处理器。
///
/// `serve` 返回即表示连接结束；返回错误只会被记录，不会改变端点的回收路径。
#[async_trait]
pub trait ConnectionHandler: Send + Sync + 'static {
    async fn serve(&self, stream: TcpStream, peer: SocketAddr) -> io::Result<()>;
}

/// Tokio 实现的每连接子状态机。
pub struct Connection<H> {
    handler: Arc<H>,
    post: Post<SessionEvent>,
    task: Option<JoinHandle<()>>,
    running: bool,
}

impl<H: ConnectionHandler> Connection<H> {
    pub(crate) fn new(handler: Arc<H>, post: Post<SessionEvent>) -> Self {
        Self {
            handler,
            post,
            task: None,
            running: false,
        }
    }

    fn launch<Fut>(&mut self, work: Fut)
    where
        Fut: Future<Output = ()> + Send + 'static,
    {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        self.task = Some(tokio::spawn(work));
        self.running = true;
    }

    fn halt(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        if self.running {
            self.running = false;
            (self.post)(SessionEvent::Stopped);
        }
    }
}

async fn accept_then_serve<H: ConnectionHandler>(
    listener: Arc<TcpListener>,
    handler: Arc<H>,
    post: Post<SessionEvent>,
) {
    let (stream, peer) = loop {
        match listener.accept().await {
            Ok(accepted) => break accepted,
            Err(error) => {
                let error = annotate(ACCEPT, error);
                warn!(
                    code = ACCEPT.code,
                    %error,
                    "accept failed, waiting for the next connection"
                );
                tokio::time::sleep(ACCEPT_RETRY_PAUSE).await;
            }
        }
    };
    // 已建立的连接不再持有监听器，监听套接字停止后端口立即关闭。
    drop(listener);
    post(SessionEvent::Accepted);
    serve(handler, stream, peer, post).await;
}

async fn serve<H: ConnectionHandler>(
    handler: Arc<H>,
    stream: TcpStream,
    peer: SocketAddr,
    post: Post<SessionEvent>,
) {
    match handler.serve(stream, peer).await {
        Ok(()) => debug!(%peer, "connection closed"),
        Err(error) => {
            let error = annotate(SERVE, error);
            warn!(code = SERVE.code, %peer, %error, "connection handler failed");
        }
    }
    post(SessionEvent::Error);
}

impl<H: ConnectionHandler> Acceptor for Connection<H> {
    type Socket = TokioSocket;

    fn start(&mut self, listener: &mut TokioSocket) {
        match listener.listener() {
            Some(listener) => {
                let handler = Arc::clone(&self.handler);
                self.launch(accept_then_serve(listener, handler, self.post.clone()));
            }
            None => {
                warn!("listening socket is not ready, acceptor stays pending");
                self.running = true;
            }
        }
    }

    fn stop(&mut self) {
        self.halt();
    }

    fn is_idle(&self) -> bool {
        !self.running
    }
}

impl<H: ConnectionHandler> Session for Connection<H> {
    type Socket = TokioSocket;

    fn start(&mut self, socket: &mut TokioSocket) {
        let Some(stream) = socket.take_stream() else {
            warn!("connected socket has no stream to hand over");
            self.running = true;
            (self.post)(SessionEvent::Error);
            return;
        };
        match stream.peer_addr() {
            Ok(peer) => {
                let work = serve(Arc::clone(&self.handler), stream, peer, self.post.clone());
                self.launch(work);
            }
            Err(error) => {
                warn!(%error, "connected stream lost its peer");
                self.running = true;
                (self.post)(SessionEvent::Error);
            }
        }
    }

    fn stop(&mut self) {
        self.halt();
    }

    fn is_idle(&self) -> bool {
        !self.running
    }
}

impl<H> Drop for Connection<H> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// 为监听端创建接受子状态机，并把它们的事件标记上连接标识。
pub struct ConnectionFactory<H> {
    handler: Arc<H>,
    sender: UnboundedSender<ListenerEvent>,
}

impl<H: ConnectionHandler> ConnectionFactory<H> {
    pub(crate) fn new(handler: Arc<H>, sender: UnboundedSender<ListenerEvent>) -> Self {
        Self { handler, sender }
    }
}

impl<H: ConnectionHandler> AcceptorFactory for ConnectionFactory<H> {
    type Acceptor = Connection<H>;

    fn create(&mut self, id: ConnectionId) -> Connection<H> {
        let post = poster(&self.sender, move |event| ListenerEvent::Connection { id, event });
        Connection::new(Arc::clone(&self.handler), post)
    }
}

#[cfg(test)]
mod tests {
    use spark_endpoint::{AddressFamily, ConnectorEvent, StreamSocket};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    use super::*;
    use crate::mailbox::mailbox;

    struct Greeter;

    #[async_trait]
    impl ConnectionHandler for Greeter {
        async fn serve(&self, mut stream: TcpStream, _peer: SocketAddr) -> io::Result<()> {
            stream.write_all(b"hello").await?;
            stream.shutdown().await
        }
    }

    #[tokio::test]
    async fn accepted_connection_is_served_then_reported_broken() {
        let (sender, mut events) = mailbox::<ListenerEvent>();
        let mut socket = TokioSocket::for_listener(poster(&sender, ListenerEvent::Socket));
        socket.start(AddressFamily::Ipv4).expect("open");
        socket
            .bind("127.0.0.1:0".parse().expect("addr"))
            .expect("bind");
        socket.listen(8).expect("listen");
        let addr = socket.local_addr().expect("bound");

        let mut factory = ConnectionFactory::new(Arc::new(Greeter), sender.clone());
        let id = ConnectionId(7);
        let mut acceptor = factory.create(id);
        Acceptor::start(&mut acceptor, &mut socket);

        let mut client = TcpStream::connect(addr).await.expect("connect");
        let mut greeting = Vec::new();
        client.read_to_end(&mut greeting).await.expect("read");
        assert_eq!(greeting, b"hello");

        assert_eq!(
            events.recv().await,
            Some(ListenerEvent::Connection { id, event: SessionEvent::Accepted })
        );
        assert_eq!(
            events.recv().await,
            Some(ListenerEvent::Connection { id, event: SessionEvent::Error })
        );

        Acceptor::stop(&mut acceptor);
        assert!(Acceptor::is_idle(&acceptor));
        assert_eq!(
            events.recv().await,
            Some(ListenerEvent::Connection { id, event: SessionEvent::Stopped })
        );
    }

    /// 一直占用连接直到被取消的处理器。
    struct Holder;

    #[async_trait]
    impl ConnectionHandler for Holder {
        async fn serve(&self, _stream: TcpStream, _peer: SocketAddr) -> io::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn served_connection_does_not_keep_the_port_listening() {
        let (sender, mut events) = mailbox::<ListenerEvent>();
        let mut socket = TokioSocket::for_listener(poster(&sender, ListenerEvent::Socket));
        socket.start(AddressFamily::Ipv4).expect("open");
        socket
            .bind("127.0.0.1:0".parse().expect("addr"))
            .expect("bind");
        socket.listen(8).expect("listen");
        let addr = socket.local_addr().expect("bound");

        let mut factory = ConnectionFactory::new(Arc::new(Holder), sender.clone());
        let id = ConnectionId(0);
        let mut connection = factory.create(id);
        Acceptor::start(&mut connection, &mut socket);

        let _client = TcpStream::connect(addr).await.expect("connect");
        assert_eq!(
            events.recv().await,
            Some(ListenerEvent::Connection { id, event: SessionEvent::Accepted })
        );

        socket.stop();
        assert!(socket.is_idle());
        assert!(!Acceptor::is_idle(&connection));
        let refused = TcpStream::connect(addr).await;
        assert!(
            refused.is_err(),
            "port kept listening while a connection was still served"
        );

        Acceptor::stop(&mut connection);
    }

    #[tokio::test]
    async fn session_without_stream_reports_error() {
        let (sender, mut events) = mailbox::<ConnectorEvent>();
        let mut socket = TokioSocket::for_connector(poster(&sender, ConnectorEvent::Socket));
        let mut session =
            Connection::new(Arc::new(Greeter), poster(&sender, ConnectorEvent::Session));
        Session::start(&mut session, &mut socket);
        assert!(!Session::is_idle(&session));
        assert_eq!(
            events.recv().await,
            Some(ConnectorEvent::Session(SessionEvent::Error))
        );
    }
}

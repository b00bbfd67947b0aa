#![deny(unsafe_code)]
#![doc = "spark-endpoint-tcp: 以 Tokio 驱动 `spark-endpoint` 状态机的 TCP 实现。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：状态机本身不绑定运行时；本 crate 提供真实的套接字、定时器、DNS 解析与每连接子状态机，使端点可以直接在 Tokio 上监听与重连。"]
#![doc = "- **What**：[`spawn_listener`] / [`spawn_connector`] 启动端点驱动任务并返回 [`EndpointHandle`]；业务读写通过 [`ConnectionHandler`] 接入。"]
#![doc = "- **How**：`socket2` 负责逐步打开、设置与绑定套接字，Tokio 负责异步监听、连接与定时；所有完成通知经同一个邮箱串行送入端点。"]
#![doc = ""]
#![doc = "== 错误分类 =="]
#![doc = "- 底层 IO 失败带有稳定错误码（`spark.endpoint.tcp.*`）记录在日志中，端点只消费其 `ErrorKind`；"]
#![doc = "- 驱动任务异常终止时，[`EndpointHandle::stop`] 返回 [`DriverError`]。"]

mod connection;
mod driver;
mod error;
mod mailbox;
mod resolver;
mod socket;
mod timer;

pub use connection::{Connection, ConnectionFactory, ConnectionHandler};
pub use driver::{
    EndpointHandle, TcpConnectorEndpoint, TcpListenerEndpoint, spawn_connector, spawn_listener,
};
pub use error::DriverError;
pub use resolver::TokioResolver;
pub use socket::TokioSocket;
pub use timer::TokioTimer;

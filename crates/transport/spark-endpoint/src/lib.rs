#![deny(unsafe_code)]
#![doc = "spark-endpoint: 监听端点与连接端点的连接生命周期状态机。"]
#![doc = ""]
#![doc = "== 使命概述 =="]
#![doc = "- **Why**：把绑定、监听、接受、解析、连接、退避重试与级联关闭编排为事件驱动的状态机，任何时刻收到停止请求都能有序收敛。"]
#![doc = "- **What**：提供 [`ListenerEndpoint`] 与 [`ConnectorEndpoint`]，以及它们依赖的协作者契约（套接字、定时器、解析器、每连接子状态机）与端点基座契约 [`EndpointHost`]。"]
#![doc = "- **How**：本 crate 不绑定任何运行时；事件由外部驱动串行投递给 `handle`，协作者动作全部“发出即返回”。Tokio 实现见 `spark-endpoint-tcp`。"]
#![doc = ""]
#![doc = "== 错误分类 =="]
#![doc = "- 配置错误：创建时同步返回 [`ConfigError`]；"]
#![doc = "- 运行期瞬时错误：记录日志、计入统计，并由退避重试吸收；"]
#![doc = "- 契约违例：事件与状态不匹配时立即 panic，不做恢复。"]

pub mod address;
pub mod backoff;
pub mod collaborator;
pub mod connector;
pub mod endpoint;
pub mod error;
mod fsm;
pub mod listener;
pub mod options;
pub mod stats;
/// 记录型协作者桩，供本 crate 与下游 crate 的测试复用。
pub mod test_stubs;

pub use address::{AddressFamily, BindAddress, ConnectAddress, Interface};
pub use backoff::{Backoff, interval_after};
pub use collaborator::{
    Acceptor, AcceptorFactory, ConnectionId, ConnectorEvent, ListenerEvent, NameResolver,
    ResolverEvent, RetryTimer, Session, SessionEvent, SocketEvent, StreamSocket, TimerEvent,
};
pub use connector::{ConnectorEndpoint, ConnectorParts, ConnectorState};
pub use endpoint::{Endpoint, EndpointRole};
pub use error::ConfigError;
pub use fsm::FsmPhase;
pub use listener::{ListenerEndpoint, ListenerParts, ListenerState};
pub use options::EndpointOptions;
pub use stats::{EndpointHost, EndpointStats, Statistic, StatsSnapshot};

//! 监听端与连接端共享的端点契约。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 持有端点集合的一方（例如套接字层或驱动任务）只关心两件事：请求停止、在停止完成后销毁；
//!   它不需要知道端点究竟是监听端还是连接端；
//! - 以 trait 对象表达这一共享契约，替代按端点种类手写分派表。
//!
//! ## 契约（What）
//! - `stop`：幂等，可在任意状态调用；停止完成前端点仍会继续消费事件；
//! - `is_stopped`：所有子对象确认空闲、端点已向基座报告停止后为 `true`；
//! - `destroy`：仅允许对已停止的端点调用，否则属于契约违例并立即终止。

use core::fmt;

/// 端点角色。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum EndpointRole {
    Listener,
    Connector,
}

impl fmt::Display for EndpointRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointRole::Listener => f.write_str("listener"),
            EndpointRole::Connector => f.write_str("connector"),
        }
    }
}

/// 端点共享契约，可作为 `Box<dyn Endpoint>` 由集合统一管理。
pub trait Endpoint {
    fn role(&self) -> EndpointRole;

    /// 创建端点时使用的原始地址字符串。
    fn address(&self) -> &str;

    /// 请求停止；完成情况通过 [`Endpoint::is_stopped`] 与基座的 `stopped` 通知观测。
    fn stop(&mut self);

    fn is_stopped(&self) -> bool;

    /// 销毁已停止的端点，释放其独占的全部协作者。
    fn destroy(self: Box<Self>);
}

//! 端点邮箱：把各协作者的完成通知串行化为一条事件流。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 端点状态机要求事件串行到达；协作者却运行在各自的 Tokio 任务中。每个协作者持有一个
//!   [`Post`] 闭包，把自己的事件包装成端点事件后投递到同一个无界通道；
//! - 事件来源由包装函数静态决定（例如 `ListenerEvent::Socket`），无需运行期标签。
//!
//! ## 契约（What）
//! - 投递是同步的，可在端点处理事件的过程中调用（例如 `stop` 内同步投递 `Stopped`）；
//! - 驱动任务退出后接收端被丢弃，投递静默失败。

use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender, unbounded_channel};

/// 协作者向端点投递事件的出口。
pub(crate) type Post<X> = Arc<dyn Fn(X) + Send + Sync>;

pub(crate) fn mailbox<E>() -> (UnboundedSender<E>, UnboundedReceiver<E>) {
    unbounded_channel()
}

/// 基于包装函数构造投递出口。
pub(crate) fn poster<E, X, W>(sender: &UnboundedSender<E>, wrap: W) -> Post<X>
where
    E: Send + 'static,
    W: Fn(X) -> E + Send + Sync + 'static,
{
    let sender = sender.clone();
    Arc::new(move |event| {
        if sender.send(wrap(event)).is_err() {
            tracing::trace!("endpoint mailbox closed, dropping event");
        }
    })
}

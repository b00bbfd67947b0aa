use core::time::Duration;

use spark_endpoint::{RetryTimer, TimerEvent};
use tokio::task::JoinHandle;

use crate::mailbox::Post;

/// 基于 `tokio::time::sleep` 的退避定时器。
///
/// 超时后保持“已装填”状态，直到端点调用 `stop`；`stop` 取消尚未触发的等待并投递一次
/// [`TimerEvent::Stopped`]。
pub struct TokioTimer {
    post: Post<TimerEvent>,
    sleeping: Option<JoinHandle<()>>,
    armed: bool,
}

impl TokioTimer {
    pub(crate) fn new(post: Post<TimerEvent>) -> Self {
        Self {
            post,
            sleeping: None,
            armed: false,
        }
    }
}

impl RetryTimer for TokioTimer {
    fn start(&mut self, timeout: Duration) {
        if let Some(task) = self.sleeping.take() {
            task.abort();
        }
        let post = self.post.clone();
        self.sleeping = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            post(TimerEvent::Timeout);
        }));
        self.armed = true;
    }

    fn stop(&mut self) {
        if let Some(task) = self.sleeping.take() {
            task.abort();
        }
        if self.armed {
            self.armed = false;
            (self.post)(TimerEvent::Stopped);
        }
    }

    fn is_idle(&self) -> bool {
        !self.armed
    }
}

impl Drop for TokioTimer {
    fn drop(&mut self) {
        if let Some(task) = self.sleeping.take() {
            task.abort();
        }
    }
}

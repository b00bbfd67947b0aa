//! 端点基座契约与默认的统计实现。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 端点状态机不向调用方抛出运行期错误，连接层面的故障只能通过计数器与“最近一次错误”
//!   被观测到；
//! - 把这些出口抽象为 [`EndpointHost`]，状态机只依赖契约，宿主可以接入自己的指标体系。
//!
//! ## 契约（What）
//! - `record`：按增量调整某个计数器，允许负数（如进行中的连接数回落）；
//! - `set_error` / `clear_error`：记住或清除最近一次运行期错误；
//! - `stopped`：端点确认所有子对象已停止后调用且仅调用一次。
//!
//! ## 注意事项（Trade-offs）
//! - [`EndpointStats`] 使用原子变量，允许在驱动任务之外的线程读取快照；
//!   快照各字段分别加载，不保证彼此之间的瞬时一致。

use std::io;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

/// 端点维护的计数器种类。
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Statistic {
    /// 已发起、尚未完成的出站连接。
    InProgressConnections,
    /// 成功建立的出站连接。
    EstablishedConnections,
    /// 活跃期间因错误而断开的连接。
    BrokenConnections,
    /// 端点关闭时被强制丢弃的活跃连接。
    DroppedConnections,
    /// 出站建连失败次数。
    ConnectErrors,
    /// 监听端接受的入站连接。
    AcceptedConnections,
    /// 监听端 bind/listen 失败次数。
    BindErrors,
}

/// 端点基座：状态机向外报告统计、错误与停止通知的出口。
pub trait EndpointHost {
    fn record(&self, stat: Statistic, delta: i64);
    fn set_error(&self, error: io::ErrorKind);
    fn clear_error(&self);
    fn stopped(&self);
}

impl<T: EndpointHost + ?Sized> EndpointHost for Arc<T> {
    fn record(&self, stat: Statistic, delta: i64) {
        (**self).record(stat, delta)
    }

    fn set_error(&self, error: io::ErrorKind) {
        (**self).set_error(error)
    }

    fn clear_error(&self) {
        (**self).clear_error()
    }

    fn stopped(&self) {
        (**self).stopped()
    }
}

/// 线程安全的默认端点基座实现。
#[derive(Debug, Default)]
pub struct EndpointStats {
    in_progress: AtomicI64,
    established: AtomicI64,
    broken: AtomicI64,
    dropped: AtomicI64,
    connect_errors: AtomicI64,
    accepted: AtomicI64,
    bind_errors: AtomicI64,
    last_error: Mutex<Option<io::ErrorKind>>,
    stopped: AtomicBool,
}

/// [`EndpointStats`] 的只读快照。
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StatsSnapshot {
    pub in_progress_connections: i64,
    pub established_connections: i64,
    pub broken_connections: i64,
    pub dropped_connections: i64,
    pub connect_errors: i64,
    pub accepted_connections: i64,
    pub bind_errors: i64,
    pub last_error: Option<io::ErrorKind>,
    pub stopped: bool,
}

impl EndpointStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建可在驱动任务与观测方之间共享的实例。
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn counter(&self, stat: Statistic) -> &AtomicI64 {
        match stat {
            Statistic::InProgressConnections => &self.in_progress,
            Statistic::EstablishedConnections => &self.established,
            Statistic::BrokenConnections => &self.broken,
            Statistic::DroppedConnections => &self.dropped,
            Statistic::ConnectErrors => &self.connect_errors,
            Statistic::AcceptedConnections => &self.accepted,
            Statistic::BindErrors => &self.bind_errors,
        }
    }

    /// 读取单个计数器。
    pub fn get(&self, stat: Statistic) -> i64 {
        self.counter(stat).load(Ordering::Acquire)
    }

    pub fn last_error(&self) -> Option<io::ErrorKind> {
        *self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            in_progress_connections: self.get(Statistic::InProgressConnections),
            established_connections: self.get(Statistic::EstablishedConnections),
            broken_connections: self.get(Statistic::BrokenConnections),
            dropped_connections: self.get(Statistic::DroppedConnections),
            connect_errors: self.get(Statistic::ConnectErrors),
            accepted_connections: self.get(Statistic::AcceptedConnections),
            bind_errors: self.get(Statistic::BindErrors),
            last_error: self.last_error(),
            stopped: self.is_stopped(),
        }
    }

    fn store_error(&self, value: Option<io::ErrorKind>) {
        *self
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = value;
    }
}

impl EndpointHost for EndpointStats {
    fn record(&self, stat: Statistic, delta: i64) {
        self.counter(stat).fetch_add(delta, Ordering::AcqRel);
    }

    fn set_error(&self, error: io::ErrorKind) {
        self.store_error(Some(error));
    }

    fn clear_error(&self) {
        self.store_error(None);
    }

    fn stopped(&self) {
        self.stopped.store(true, Ordering::Release);
    }
}

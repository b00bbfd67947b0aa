//! 端点选项：端点基座在创建时交给状态机读取的配置集合。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 把 `IPV4ONLY`、`RECONNECT_IVL`、`RECONNECT_IVL_MAX`、`SNDBUF`、`RCVBUF` 与监听 backlog
//!   收敛为一个强类型结构，避免状态机到处按名字查询选项；
//! - 通过 `serde` 支持从配置文件（如 TOML 表）加载，缺省字段自动回落到默认值。
//!
//! ## 契约（What）
//! - `reconnect_ivl_max_ms == 0` 表示“与基础间隔相同”，即退避不增长；
//!   [`EndpointOptions::reconnect_interval_max`] 已经应用该规则；
//! - 所有字段在端点创建时被读取一次，之后修改选项不会影响已经运行的端点。

use core::time::Duration;

use serde::Deserialize;

/// 默认重连基础间隔（毫秒）。
pub const DEFAULT_RECONNECT_IVL_MS: u64 = 100;
/// 默认发送/接收缓冲区大小（字节）。
pub const DEFAULT_BUFFER_SIZE: usize = 128 * 1024;
/// 默认 listen backlog：设得足够高，以吸收重连风暴中的集中建连。
pub const DEFAULT_BACKLOG: u32 = 100;

/// 端点选项。
#[derive(Clone, Debug, Eq, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EndpointOptions {
    /// 仅使用 IPv4。
    pub ipv4_only: bool,
    /// 退避基础间隔（毫秒）。
    pub reconnect_ivl_ms: u64,
    /// 退避最大间隔（毫秒），0 表示与基础间隔相同。
    pub reconnect_ivl_max_ms: u64,
    /// 连接端在 bind 之前设置的发送缓冲区大小。
    pub sndbuf: usize,
    /// 连接端在 bind 之前设置的接收缓冲区大小。
    pub rcvbuf: usize,
    /// 监听端的 listen backlog。
    pub backlog: u32,
}

impl Default for EndpointOptions {
    fn default() -> Self {
        Self {
            ipv4_only: true,
            reconnect_ivl_ms: DEFAULT_RECONNECT_IVL_MS,
            reconnect_ivl_max_ms: 0,
            sndbuf: DEFAULT_BUFFER_SIZE,
            rcvbuf: DEFAULT_BUFFER_SIZE,
            backlog: DEFAULT_BACKLOG,
        }
    }
}

impl EndpointOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ipv4_only(mut self, ipv4_only: bool) -> Self {
        self.ipv4_only = ipv4_only;
        self
    }

    pub fn with_reconnect_interval(mut self, interval: Duration) -> Self {
        self.reconnect_ivl_ms = duration_to_millis(interval);
        self
    }

    pub fn with_reconnect_interval_max(mut self, interval: Duration) -> Self {
        self.reconnect_ivl_max_ms = duration_to_millis(interval);
        self
    }

    pub fn with_buffer_sizes(mut self, sndbuf: usize, rcvbuf: usize) -> Self {
        self.sndbuf = sndbuf;
        self.rcvbuf = rcvbuf;
        self
    }

    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// 退避基础间隔。
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_ivl_ms)
    }

    /// 生效的退避最大间隔：配置为 0 时等于基础间隔。
    pub fn reconnect_interval_max(&self) -> Duration {
        if self.reconnect_ivl_max_ms == 0 {
            self.reconnect_interval()
        } else {
            Duration::from_millis(self.reconnect_ivl_max_ms)
        }
    }
}

fn duration_to_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

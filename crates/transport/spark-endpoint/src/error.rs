//! # error 模块说明
//!
//! ## 角色定位（Why）
//! - 端点只有一类错误会同步返回给调用方：创建阶段发现的配置错误（地址格式非法、
//!   本地网卡无法解析）。运行期的 bind/listen/connect/resolve 失败全部由退避重试吸收，
//!   不会出现在任何返回值里；
//! - 事件与当前状态不匹配属于契约违例，走 [`contract_violation`] 直接终止，而不是降级为
//!   可恢复错误。
//!
//! ## 设计要求（What）
//! - [`ConfigError`] 派生 `thiserror::Error`，并通过 [`ConfigError::code`] 暴露
//!   `spark.endpoint.*` 命名空间下的稳定错误码，便于日志与告警聚合。

use core::fmt;

use thiserror::Error;

/// 地址格式非法时使用的稳定错误码（对应经典 `EINVAL`）。
pub const INVALID_ADDRESS: &str = "spark.endpoint.invalid_address";
/// 本地网卡段无法解析时使用的稳定错误码（对应经典 `ENODEV`）。
pub const NO_SUCH_INTERFACE: &str = "spark.endpoint.no_such_interface";

/// 端点创建阶段的配置错误。
///
/// # 教案式说明
/// - **意图 (Why)**：配置错误在创建时一次性检出，状态机尚未启动，因此可以安全地把错误
///   返还给调用方，而不会遗留任何半初始化的子对象；
/// - **契约 (What)**：
///   - `InvalidAddress`：端口缺失/越界、主机名不合法、IPv6 字面量与 `ipv4_only` 冲突；
///   - `NoSuchInterface`：绑定地址或连接端本地段既不是 `*` 也不是可用的 IP 字面量；
/// - **风险 (Trade-offs)**：错误中保留原始地址字符串，排障方便，但调用方在日志中输出时
///   需自行评估是否包含敏感主机名。
#[derive(Clone, Debug, Eq, PartialEq, Error)]
pub enum ConfigError {
    /// 地址字符串无法分解或校验失败。
    #[error("invalid endpoint address `{address}`: {reason}")]
    InvalidAddress {
        address: String,
        reason: &'static str,
    },

    /// 本地网卡段无法解析。
    #[error("no such interface `{interface}`")]
    NoSuchInterface { interface: String },
}

impl ConfigError {
    pub(crate) fn invalid(address: &str, reason: &'static str) -> Self {
        ConfigError::InvalidAddress {
            address: address.to_owned(),
            reason,
        }
    }

    pub(crate) fn no_interface(interface: &str) -> Self {
        ConfigError::NoSuchInterface {
            interface: interface.to_owned(),
        }
    }

    /// 返回稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::InvalidAddress { .. } => INVALID_ADDRESS,
            ConfigError::NoSuchInterface { .. } => NO_SUCH_INTERFACE,
        }
    }
}

/// 报告状态机收到了当前状态无法处理的事件，并立即终止。
///
/// # 教案式说明
/// - **意图 (Why)**：事件错位只可能来自协作者行为异常或端点自身的缺陷；继续运行会破坏
///   关闭级联、重复释放子对象，因此必须快速失败；
/// - **逻辑 (How)**：先以 `tracing::error!` 留下结构化现场（状态机名、状态、事件），
///   再 `panic!`；消息固定包含 `illegal event`，测试可以据此断言；
/// - **契约 (What)**：永不返回。调用点的位置由 `#[track_caller]` 带入 panic 信息。
#[cold]
#[track_caller]
pub(crate) fn contract_violation(
    machine: &'static str,
    state: &dyn fmt::Debug,
    event: &dyn fmt::Debug,
) -> ! {
    tracing::error!(
        machine,
        state = ?state,
        event = ?event,
        "endpoint state machine received an illegal event"
    );
    panic!("{machine}: illegal event {event:?} in state {state:?}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            ConfigError::invalid("tcp", "missing port").code(),
            "spark.endpoint.invalid_address"
        );
        assert_eq!(
            ConfigError::no_interface("eth9").code(),
            "spark.endpoint.no_such_interface"
        );
    }

    #[test]
    fn display_carries_the_address() {
        let err = ConfigError::invalid("host:abc", "port is not a number");
        assert_eq!(
            err.to_string(),
            "invalid endpoint address `host:abc`: port is not a number"
        );
    }

    #[test]
    #[should_panic(expected = "illegal event")]
    fn contract_violation_panics() {
        contract_violation("listener", &"Idle", &"Timeout");
    }
}

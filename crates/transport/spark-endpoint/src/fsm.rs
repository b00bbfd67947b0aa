//! 端点状态机的生命周期游标。
//!
//! # 教案级注释
//!
//! ## 意图（Why）
//! - 每个端点都有两套事件处理逻辑：正常运行时的 handler，以及收到停止请求之后的
//!   shutdown 例程。[`Fsm`] 负责决定一个事件该交给谁；
//! - 停止不是立即完成的：它本身是一次状态迁移，要等所有子对象确认空闲后才进入终态。
//!
//! ## 契约（What）
//! - `Idle → Active`：仅允许一次启动；
//! - `Active → Stopping`：`begin_stop` 在非 `Active` 时返回 `false`，使停止请求幂等；
//! - `Stopping → Stopped`：由端点在级联完成后调用 `finish_stop`；
//! - 在 `Idle`/`Stopped` 阶段投递的事件属于契约违例。

use core::fmt;

use crate::error::contract_violation;

/// 生命周期阶段。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FsmPhase {
    /// 尚未启动。
    Idle,
    /// 正常运行，事件交给 handler。
    Active,
    /// 已收到停止请求，事件交给 shutdown 例程。
    Stopping,
    /// 终态：所有子对象均已停止。
    Stopped,
}

/// 事件的去向。
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Route {
    Handler,
    Shutdown,
}

#[derive(Debug)]
pub(crate) struct Fsm {
    machine: &'static str,
    phase: FsmPhase,
}

impl Fsm {
    pub(crate) fn new(machine: &'static str) -> Self {
        Self {
            machine,
            phase: FsmPhase::Idle,
        }
    }

    pub(crate) fn phase(&self) -> FsmPhase {
        self.phase
    }

    #[track_caller]
    pub(crate) fn start(&mut self) {
        if self.phase != FsmPhase::Idle {
            contract_violation(self.machine, &self.phase, &"start");
        }
        self.phase = FsmPhase::Active;
    }

    /// 进入停止流程；若端点并非运行态则返回 `false`。
    pub(crate) fn begin_stop(&mut self) -> bool {
        if self.phase != FsmPhase::Active {
            return false;
        }
        self.phase = FsmPhase::Stopping;
        true
    }

    #[track_caller]
    pub(crate) fn route(&self, event: &dyn fmt::Debug) -> Route {
        match self.phase {
            FsmPhase::Active => Route::Handler,
            FsmPhase::Stopping => Route::Shutdown,
            FsmPhase::Idle | FsmPhase::Stopped => {
                contract_violation(self.machine, &self.phase, event)
            }
        }
    }

    pub(crate) fn finish_stop(&mut self) {
        debug_assert_eq!(self.phase, FsmPhase::Stopping);
        self.phase = FsmPhase::Stopped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stop_is_idempotent() {
        let mut fsm = Fsm::new("test");
        assert!(!fsm.begin_stop(), "idle machine ignores stop");
        fsm.start();
        assert_eq!(fsm.route(&"event"), Route::Handler);
        assert!(fsm.begin_stop());
        assert!(!fsm.begin_stop());
        assert_eq!(fsm.route(&"event"), Route::Shutdown);
        fsm.finish_stop();
        assert_eq!(fsm.phase(), FsmPhase::Stopped);
        assert!(!fsm.begin_stop());
    }

    #[test]
    #[should_panic(expected = "illegal event")]
    fn events_after_termination_are_fatal() {
        let mut fsm = Fsm::new("test");
        fsm.start();
        fsm.begin_stop();
        fsm.finish_stop();
        fsm.route(&"late event");
    }

    #[test]
    #[should_panic(expected = "illegal event")]
    fn double_start_is_fatal() {
        let mut fsm = Fsm::new("test");
        fsm.start();
        fsm.start();
    }
}

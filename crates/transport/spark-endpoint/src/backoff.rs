//! 指数退避：两类端点共用的重试节律。
//!
//! # 教案式说明
//! - **意图（Why）**：bind/listen/resolve/connect 失败后不能原地重试，否则会在故障期间
//!   持续冲击系统；每次失败都先等待一段逐次翻倍的时间；
//! - **契约（What）**：
//!   - 第 `k` 次（从 0 开始）启动等待 `min(base * 2^k, max)`；
//!   - `max` 配置为 0 时视为等于 `base`，即不增长；
//!   - 间隔在端点存活期间单调增长、从不重置，只有销毁并重建端点才会回到 `base`；
//! - **实现（How）**：内部维护当前间隔，每次未触顶的启动将其翻倍；翻倍溢出时按
//!   `Duration::MAX` 处理，随即被 `max` 截断，任意次数的失败都不会溢出；
//! - **权衡（Trade-offs）**：不引入抖动，保证测试可精确断言间隔；若需要打散同步重连，
//!   可在定时器实现一侧叠加。

use core::time::Duration;

use crate::collaborator::RetryTimer;

/// 第 `attempt` 次（从 0 开始）启动退避时的等待时长。
pub fn interval_after(base: Duration, max: Duration, attempt: u32) -> Duration {
    let max = effective_max(base, max);
    let mut interval = base;
    // 零间隔翻倍仍为零；其余情况至多约 95 次翻倍即越过任何 `max`。
    if base.is_zero() {
        return base;
    }
    for _ in 0..attempt {
        if interval >= max {
            break;
        }
        interval = doubled(interval);
    }
    interval.min(max)
}

fn doubled(interval: Duration) -> Duration {
    interval.checked_mul(2).unwrap_or(Duration::MAX)
}

fn effective_max(base: Duration, max: Duration) -> Duration {
    if max.is_zero() { base } else { max }
}

/// 包装原始定时器的退避对象，由端点独占。
#[derive(Debug)]
pub struct Backoff<T> {
    timer: T,
    max: Duration,
    current: Duration,
    attempts: u32,
}

impl<T: RetryTimer> Backoff<T> {
    pub fn new(timer: T, base: Duration, max: Duration) -> Self {
        Self {
            timer,
            max: effective_max(base, max),
            current: base,
            attempts: 0,
        }
    }

    /// 下一次 `start` 将使用的等待时长。
    pub fn next_interval(&self) -> Duration {
        self.current.min(self.max)
    }

    /// 以当前间隔启动定时器，并把下一次间隔翻倍。
    pub fn start(&mut self) -> Duration {
        let interval = self.current.min(self.max);
        if self.current < self.max {
            self.current = doubled(self.current);
        }
        self.attempts = self.attempts.saturating_add(1);
        self.timer.start(interval);
        interval
    }

    pub fn stop(&mut self) {
        self.timer.stop();
    }

    pub fn is_idle(&self) -> bool {
        self.timer.is_idle()
    }

    /// 自创建以来启动的次数。
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct RecordingTimer {
        started: Vec<Duration>,
        running: bool,
    }

    impl RetryTimer for RecordingTimer {
        fn start(&mut self, timeout: Duration) {
            self.started.push(timeout);
            self.running = true;
        }

        fn stop(&mut self) {
            self.running = false;
        }

        fn is_idle(&self) -> bool {
            !self.running
        }
    }

    #[test]
    fn doubles_until_capped() {
        let mut backoff = Backoff::new(
            RecordingTimer::default(),
            Duration::from_millis(100),
            Duration::from_millis(700),
        );
        for _ in 0..5 {
            backoff.start();
            backoff.stop();
        }
        let expected: Vec<_> = [100, 200, 400, 700, 700]
            .into_iter()
            .map(Duration::from_millis)
            .collect();
        assert_eq!(backoff.timer().started, expected);
        assert_eq!(backoff.attempts(), 5);
    }

    #[test]
    fn zero_max_disables_growth() {
        let mut backoff = Backoff::new(
            RecordingTimer::default(),
            Duration::from_millis(100),
            Duration::ZERO,
        );
        assert_eq!(backoff.start(), Duration::from_millis(100));
        assert_eq!(backoff.start(), Duration::from_millis(100));
        assert_eq!(backoff.next_interval(), Duration::from_millis(100));
    }

    #[test]
    fn closed_form_saturates() {
        let base = Duration::from_secs(1);
        let max = Duration::from_secs(60);
        assert_eq!(interval_after(base, max, 0), base);
        assert_eq!(interval_after(base, max, 5), Duration::from_secs(32));
        assert_eq!(interval_after(base, max, 6), max);
        assert_eq!(interval_after(base, max, 200), max);
        assert_eq!(interval_after(base, Duration::ZERO, 3), base);
    }

    #[test]
    fn growth_continues_past_a_32_bit_multiplier() {
        let base = Duration::from_millis(1);
        let max = Duration::from_millis(u64::MAX / 2);
        let mut backoff = Backoff::new(RecordingTimer::default(), base, max);
        let last = (0..34).map(|_| backoff.start()).last();
        let expected = Duration::from_millis(1 << 33);
        assert_eq!(last, Some(expected));
        assert_eq!(interval_after(base, max, 33), expected);
        assert_eq!(interval_after(base, max, 70), max);
    }

    #[test]
    fn zero_base_stays_zero() {
        assert_eq!(
            interval_after(Duration::ZERO, Duration::from_secs(1), u32::MAX),
            Duration::ZERO
        );
    }
}

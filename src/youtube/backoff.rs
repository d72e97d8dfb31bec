use rand::Rng;
use std::time::Duration;

use crate::config::RetryConfig;

/// 指数バックオフの最大試行回数
/// これを超えるとリトライを停止する
const MAX_ATTEMPTS: u32 = 10;

/// ジッタの最大割合（計算した待機時間に対する比率）
const MAX_JITTER_RATIO: f64 = 0.1;

/// 指数バックオフを管理する構造体
/// エラー時のリトライ間隔を指数的に増加させる（1s→2s→4s→8s→16s...）
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
    current_attempt: u32,
    jitter: bool,
}

impl ExponentialBackoff {
    /// 新しいExponentialBackoffインスタンスを作成
    ///
    /// デフォルト設定:
    /// - base_delay: 1秒
    /// - max_delay: 60秒
    /// - max_attempts: 10回
    pub fn new() -> Self {
        Self::with_config(Duration::from_secs(1), Duration::from_secs(60), MAX_ATTEMPTS)
    }

    /// カスタム設定でExponentialBackoffインスタンスを作成
    pub fn with_config(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            current_attempt: 0,
            jitter: false,
        }
    }

    /// リトライ設定から作成
    ///
    /// 複数セッションの再試行が揃わないようジッタを付ける。
    pub fn from_config(config: &RetryConfig) -> Self {
        Self::with_config(
            Duration::from_millis(config.base_delay_ms),
            Duration::from_millis(config.max_delay_ms),
            config.max_attempts,
        )
        .jittered()
    }

    fn jittered(mut self) -> Self {
        self.jitter = true;
        self
    }

    /// 次のリトライまでの待機時間を計算して返す
    ///
    /// 計算式: base_delay * 2^current_attempt (+ 最大10%のジッタ)
    /// max_delayを超える場合はmax_delayが返される
    pub fn next_delay(&mut self) -> Duration {
        let factor = 2u32.saturating_pow(self.current_attempt);
        let mut delay = self.base_delay.saturating_mul(factor);
        self.current_attempt = self.current_attempt.saturating_add(1);

        if self.jitter {
            let ratio = rand::thread_rng().gen_range(0.0..=MAX_JITTER_RATIO);
            delay = delay.saturating_add(delay.mul_f64(ratio));
        }
        delay.min(self.max_delay)
    }

    /// バックオフカウンターをリセット（成功時に呼び出す）
    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    /// 最大試行回数に達したかどうかを確認
    pub fn has_exceeded_max_attempts(&self) -> bool {
        self.current_attempt >= self.max_attempts
    }
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_progression() {
        let mut backoff = ExponentialBackoff::new();

        assert_eq!(backoff.next_delay(), Duration::from_secs(1)); // 2^0 = 1
        assert_eq!(backoff.next_delay(), Duration::from_secs(2)); // 2^1 = 2
        assert_eq!(backoff.next_delay(), Duration::from_secs(4));
        assert_eq!(backoff.next_delay(), Duration::from_secs(8));
        assert_eq!(backoff.next_delay(), Duration::from_secs(16));
        assert_eq!(backoff.next_delay(), Duration::from_secs(32));
        assert_eq!(backoff.next_delay(), Duration::from_secs(60)); // 2^6 = 64 -> max 60
    }

    #[test]
    fn test_backoff_reset() {
        let mut backoff = ExponentialBackoff::new();

        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
        assert_eq!(backoff.next_delay(), Duration::from_secs(2));

        backoff.reset();

        assert_eq!(backoff.next_delay(), Duration::from_secs(1));
    }

    #[test]
    fn test_max_attempts() {
        let mut backoff =
            ExponentialBackoff::with_config(Duration::from_secs(1), Duration::from_secs(60), 3);

        assert!(!backoff.has_exceeded_max_attempts());
        backoff.next_delay();
        backoff.next_delay();
        assert!(!backoff.has_exceeded_max_attempts());
        backoff.next_delay();
        assert!(backoff.has_exceeded_max_attempts());

        backoff.reset();
        assert!(!backoff.has_exceeded_max_attempts());
    }

    #[test]
    fn test_jitter_is_bounded_and_non_decreasing() {
        let mut backoff = ExponentialBackoff::from_config(&RetryConfig {
            base_delay_ms: 1000,
            max_delay_ms: 10_000,
            max_attempts: 10,
        });

        let mut previous = Duration::ZERO;
        for attempt in 0..8u32 {
            let delay = backoff.next_delay();
            let base = Duration::from_millis(1000 * 2u64.pow(attempt)).min(Duration::from_secs(10));
            assert!(delay >= base, "attempt {}: {:?} < {:?}", attempt, delay, base);
            assert!(delay <= Duration::from_secs(10));
            assert!(delay >= previous);
            previous = delay;
        }
    }

    #[test]
    fn test_huge_attempt_count_does_not_overflow() {
        let mut backoff =
            ExponentialBackoff::with_config(Duration::from_secs(1), Duration::from_secs(60), 100);
        for _ in 0..80 {
            assert!(backoff.next_delay() <= Duration::from_secs(60));
        }
    }
}

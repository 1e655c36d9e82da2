/// 指数バックオフ+ジッター付き再試行ロジック。
///
/// 同時実行中のジョブが同期して再試行しないよう、遅延には±20%のジッターを加える。
use std::time::Duration;

use rand::Rng;
use tokio::time::sleep;
use tracing::{info, warn};

/// 再試行戦略の設定。
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryConfig {
    /// 最大試行回数（初回を含む）
    max_attempts: u32,
    /// ベースとなる遅延時間（ミリ秒）
    base_delay_ms: u64,
    /// 最大遅延時間（ミリ秒）
    max_delay_ms: u64,
    /// 遅延の倍率
    multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30000,
            multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// 新しい再試行設定を作成する。
    #[must_use]
    pub const fn new(
        max_attempts: u32,
        base_delay_ms: u64,
        max_delay_ms: u64,
        multiplier: f64,
    ) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms,
            multiplier,
        }
    }

    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// 指定された試行回数に対する遅延時間を計算する。
    ///
    /// `delay(k) = base * multiplier^(k-1)` を上限でキャップし、±20%のジッターを加える。
    ///
    /// # Arguments
    /// * `attempt` - 失敗した試行の回数（1から開始）
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::from_millis(0);
        }

        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let exponential = (self.base_delay_ms as f64) * self.multiplier.powi(exponent);
        let capped = exponential.min(self.max_delay_ms as f64);

        // ±20% jitter
        let factor = rand::rng().random_range(0.8..=1.2);
        Duration::from_millis((capped * factor) as u64)
    }

    /// この試行回数でまだ再試行可能かどうかを判定する。
    #[must_use]
    pub const fn can_retry(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

/// 一時的な失敗と恒久的な失敗の分類。
///
/// 一時的（ネットワーク断、レート制限など）な失敗のみが再試行の対象となる。
pub trait FailureClass {
    fn is_transient(&self) -> bool;
}

/// 操作を再試行付きで実行する。
///
/// 一時的と分類された失敗のみを予算内で再試行し、恒久的な失敗は即座に返す。
/// 呼び出し元から渡された `attempts` カウンタを試行ごとにインクリメントする
/// （観測用。失敗時も成功時も最終値が試行回数を表す）。
///
/// # Errors
/// 恒久的な失敗、または予算を使い切った場合は最後のエラーを返す。
pub async fn execute<T, E, F, Fut>(
    config: &RetryConfig,
    attempts: &mut u32,
    context: &'static str,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: FailureClass + std::fmt::Display,
{
    loop {
        *attempts += 1;
        match operation().await {
            Ok(value) => {
                if *attempts > 1 {
                    info!(attempts = *attempts, context, "operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(error) => {
                if !error.is_transient() {
                    warn!(%error, context, "permanent failure, not retrying");
                    return Err(error);
                }

                if !config.can_retry(*attempts) {
                    warn!(
                        attempts = *attempts,
                        max_attempts = config.max_attempts,
                        %error,
                        context,
                        "operation failed after all retries"
                    );
                    return Err(error);
                }

                let delay = config.delay_for_attempt(*attempts);
                warn!(
                    attempt = *attempts,
                    max_attempts = config.max_attempts,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    %error,
                    context,
                    "transient failure, retrying"
                );
                sleep(delay).await;
            }
        }
    }
}

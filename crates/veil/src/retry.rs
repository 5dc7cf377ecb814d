use crate::errors::{Result, VeilError};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct BackoffConfig {
    /// Number of full rounds. Each round tries every endpoint once.
    pub rounds: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Random jitter (`0..=jitter_max_ms`) added to each backoff sleep.
    pub jitter_max_ms: u64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            rounds: 3,
            base_delay: Duration::from_millis(400),
            max_delay: Duration::from_secs(4),
            jitter_max_ms: 250,
        }
    }
}

impl BackoffConfig {
    /// Single pass over the endpoints, no sleeping.
    pub const fn once() -> Self {
        Self {
            rounds: 1,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_max_ms: 0,
        }
    }
}

fn backoff_delay(cfg: &BackoffConfig, round: usize) -> Duration {
    let shift = u32::try_from(round.min(16)).unwrap_or(16_u32);
    let pow2 = 1_u64.checked_shl(shift).unwrap_or(u64::MAX);
    let base_ms = u64::try_from(cfg.base_delay.as_millis()).unwrap_or(u64::MAX);
    let max_ms = u64::try_from(cfg.max_delay.as_millis()).unwrap_or(u64::MAX);
    let ms = base_ms.saturating_mul(pow2).min(max_ms);
    let jitter = if cfg!(test) || cfg.jitter_max_ms == 0 {
        0
    } else {
        rand::random::<u64>() % cfg.jitter_max_ms.saturating_add(1).max(1)
    };
    Duration::from_millis(ms.saturating_add(jitter))
}

/// Try `op(item)` across all items, in order, for `rounds` rounds, sleeping with exponential
/// backoff between rounds. Only transient errors are retried; anything else returns at once.
pub async fn try_all_with_backoff<I, T, Fut>(
    items: &[I],
    cfg: &BackoffConfig,
    mut op: impl FnMut(&I) -> Fut + Send,
    context_label: &'static str,
) -> Result<T>
where
    I: Sync,
    Fut: std::future::Future<Output = Result<T>> + Send,
{
    if items.is_empty() {
        return Err(VeilError::Configuration(format!(
            "{context_label}: no endpoints configured"
        )));
    }
    if cfg.rounds == 0 {
        return Err(VeilError::Configuration(format!(
            "{context_label}: backoff rounds must be at least 1"
        )));
    }

    let mut last_err = None;
    for round in 0..cfg.rounds {
        for item in items {
            match op(item).await {
                Ok(v) => return Ok(v),
                Err(e) if e.is_transient() => {
                    tracing::debug!(label = context_label, round, error = %e, "attempt failed");
                    last_err = Some(e);
                }
                Err(e) => return Err(e),
            }
        }
        if round + 1 < cfg.rounds {
            tokio::time::sleep(backoff_delay(cfg, round)).await;
        }
    }

    tracing::warn!(label = context_label, rounds = cfg.rounds, "all endpoints failed");
    Err(last_err
        .unwrap_or_else(|| VeilError::Broadcast(format!("{context_label}: no attempt made"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn fast(rounds: usize) -> BackoffConfig {
        BackoffConfig {
            rounds,
            base_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            jitter_max_ms: 0,
        }
    }

    #[test]
    fn delay_doubles_up_to_max() {
        let cfg = BackoffConfig::default();
        assert_eq!(backoff_delay(&cfg, 0), Duration::from_millis(400));
        assert_eq!(backoff_delay(&cfg, 1), Duration::from_millis(800));
        assert_eq!(backoff_delay(&cfg, 5), Duration::from_secs(4));
        assert_eq!(backoff_delay(&cfg, 500), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn tries_every_item_each_round() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let res: Result<()> = try_all_with_backoff(
            &["a", "b", "c"],
            &fast(2),
            move |_item| {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(VeilError::Broadcast("down".into())) }
            },
            "op",
        )
        .await;
        assert_eq!(res, Err(VeilError::Broadcast("down".into())));
        assert_eq!(calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn returns_first_success() -> eyre::Result<()> {
        let out = try_all_with_backoff(
            &["a", "b", "c"],
            &fast(3),
            |item| {
                let hit = *item == "b";
                async move {
                    if hit {
                        Ok(42_i32)
                    } else {
                        Err(VeilError::Broadcast("nope".into()))
                    }
                }
            },
            "op",
        )
        .await?;
        assert_eq!(out, 42_i32);
        Ok(())
    }

    #[tokio::test]
    async fn permanent_error_stops_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&calls);
        let res: Result<()> = try_all_with_backoff(
            &["a", "b"],
            &fast(3),
            move |_item| {
                c.fetch_add(1, Ordering::SeqCst);
                async { Err(VeilError::Format("bad tx".into())) }
            },
            "op",
        )
        .await;
        assert!(matches!(res, Err(VeilError::Format(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_items_is_configuration_error() {
        let items: [&str; 0] = [];
        let res: Result<()> =
            try_all_with_backoff(&items, &fast(1), |_item| async { Ok(()) }, "op").await;
        assert!(matches!(res, Err(VeilError::Configuration(_))));
    }
}

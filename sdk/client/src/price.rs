//! Token prices in lamports, with a bounded retry for flaky oracles.

use async_trait::async_trait;
use log::warn;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::sleep;

use crate::error::{ElusivError, Result};
use crate::token::LAMPORTS_TOKEN_ID;

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Lamports per whole token of `token_id`
    async fn lamports_per_token(&self, token_id: u16) -> Result<u64>;
}

/// Prices fixed up front (config or tests)
#[derive(Debug, Clone, Default)]
pub struct FixedPriceSource {
    prices: HashMap<u16, u64>,
}

impl FixedPriceSource {
    pub fn new(prices: HashMap<u16, u64>) -> Self {
        Self { prices }
    }
}

#[async_trait]
impl PriceSource for FixedPriceSource {
    async fn lamports_per_token(&self, token_id: u16) -> Result<u64> {
        self.prices
            .get(&token_id)
            .copied()
            .ok_or(ElusivError::MissingPrice { token_id })
    }
}

/// Up to `attempts` tries with a fixed `delay` in between.
/// Lamports never need a price and return `None`.
pub async fn fetch_price_with_retry(
    source: &dyn PriceSource,
    token_id: u16,
    attempts: u32,
    delay: Duration,
) -> Result<Option<u64>> {
    if token_id == LAMPORTS_TOKEN_ID {
        return Ok(None);
    }

    let mut last_err = ElusivError::MissingPrice { token_id };
    for attempt in 0..attempts.max(1) {
        if attempt > 0 {
            sleep(delay).await;
        }
        match source.lamports_per_token(token_id).await {
            Ok(price) => return Ok(Some(price)),
            Err(e) => {
                warn!("Price fetch {} for token {} failed: {}", attempt + 1, token_id, e);
                last_err = e;
            }
        }
    }
    Err(last_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    struct Flaky {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl PriceSource for Flaky {
        async fn lamports_per_token(&self, _token_id: u16) -> Result<u64> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(ElusivError::Http("oracle unavailable".into()))
            } else {
                Ok(42)
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_with_fixed_delay() {
        let source = Flaky {
            failures: 2,
            calls: AtomicU32::new(0),
        };
        let started = Instant::now();
        let price = fetch_price_with_retry(&source, 1, 3, Duration::from_millis(500))
            .await
            .unwrap();
        assert_eq!(price, Some(42));
        assert_eq!(started.elapsed(), Duration::from_millis(1000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_gives_up_after_attempts() {
        let source = Flaky {
            failures: 10,
            calls: AtomicU32::new(0),
        };
        let err = fetch_price_with_retry(&source, 1, 3, Duration::from_millis(500))
            .await
            .unwrap_err();
        assert!(matches!(err, ElusivError::Http(_)));
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_lamports_need_no_price() {
        let source = FixedPriceSource::default();
        assert_eq!(
            fetch_price_with_retry(&source, 0, 1, Duration::ZERO).await.unwrap(),
            None
        );
        assert!(matches!(
            fetch_price_with_retry(&source, 2, 1, Duration::ZERO).await,
            Err(ElusivError::MissingPrice { token_id: 2 })
        ));
    }
}

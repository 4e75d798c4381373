//! Token bucket rate limiter used to pace upload writes.

use std::time::Duration;

use tokio::time::Instant;

/// Token bucket rate limiter.
///
/// Tokens refill at a fixed rate up to `capacity`; each paced operation
/// consumes one or more tokens. Uses tokio's clock so paused-time tests
/// advance it deterministically.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u64,
    tokens: u64,
    /// Tokens added per second
    refill_rate: u64,
    last_refill: Instant,
}

/// Errors that can occur during token bucket operations.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum TokenBucketError {
    #[error("Insufficient tokens: requested {requested}, available {available}")]
    InsufficientTokens { requested: u64, available: u64 },
}

impl TokenBucket {
    /// Creates a full bucket. Zero capacity or rate are raised to one.
    pub fn new(capacity: u64, refill_rate: u64) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tokens: capacity,
            refill_rate: refill_rate.max(1),
            last_refill: Instant::now(),
        }
    }

    /// Bucket that allows `ops_per_second` operations with a one second burst.
    pub fn per_second(ops_per_second: u64) -> Self {
        Self::new(ops_per_second, ops_per_second)
    }

    /// Consumes `tokens` if all of them are available.
    ///
    /// # Errors
    ///
    /// - `TokenBucketError::InsufficientTokens` - Fewer than `tokens` are available
    pub fn try_consume(&mut self, tokens: u64) -> Result<(), TokenBucketError> {
        self.refill();

        if self.tokens >= tokens {
            self.tokens -= tokens;
            Ok(())
        } else {
            Err(TokenBucketError::InsufficientTokens {
                requested: tokens,
                available: self.tokens,
            })
        }
    }

    /// Waits until one token is available and consumes it.
    ///
    /// Cancel safe: a token is only taken when the future completes.
    pub async fn acquire(&mut self) {
        while self.try_consume(1).is_err() {
            tokio::time::sleep(self.refill_interval()).await;
        }
    }

    pub fn available_tokens(&mut self) -> u64 {
        self.refill();
        self.tokens
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn refill_rate(&self) -> u64 {
        self.refill_rate
    }

    fn refill_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refill_rate as f64)
    }

    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill);

        let tokens_to_add = (elapsed.as_secs_f64() * self.refill_rate as f64) as u64;
        if tokens_to_add > 0 {
            self.tokens = (self.tokens + tokens_to_add).min(self.capacity);
            self.last_refill = now;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_bucket_starts_full() {
        let mut bucket = TokenBucket::new(10, 5);
        assert_eq!(bucket.available_tokens(), 10);
        assert!(bucket.try_consume(10).is_ok());
        assert_eq!(
            bucket.try_consume(1),
            Err(TokenBucketError::InsufficientTokens {
                requested: 1,
                available: 0
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_bucket_refills_over_time() {
        let mut bucket = TokenBucket::new(10, 10);
        bucket.try_consume(10).unwrap();

        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(bucket.available_tokens(), 5);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(bucket.available_tokens(), 10);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_paces_operations() {
        let mut bucket = TokenBucket::per_second(4);
        let start = Instant::now();
        for _ in 0..8 {
            bucket.acquire().await;
        }
        // Four burst tokens, then four more at 250ms each.
        assert!(start.elapsed() >= Duration::from_millis(1000));
        assert!(start.elapsed() < Duration::from_millis(1500));
    }

    #[tokio::test]
    async fn test_zero_rate_is_clamped() {
        let bucket = TokenBucket::new(0, 0);
        assert_eq!(bucket.capacity(), 1);
        assert_eq!(bucket.refill_rate(), 1);
    }
}

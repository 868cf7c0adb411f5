use std::time::Instant;

/// Simple token-bucket rate limiter, grounded on the teacher's
/// `enrich/resilient_client.rs::TokenBucket`.
pub struct TokenBucket {
    capacity: u32,
    tokens: f64,
    refill_per_sec: u32,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: u32) -> Self {
        Self {
            capacity,
            tokens: capacity as f64,
            refill_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        let added = elapsed * self.refill_per_sec as f64;
        if added > 0.0 {
            self.tokens = (self.tokens + added).min(self.capacity as f64);
            self.last_refill = Instant::now();
        }
    }

    pub fn try_acquire(&mut self, n: u32) -> bool {
        self.refill();
        if self.tokens >= n as f64 {
            self.tokens -= n as f64;
            true
        } else {
            false
        }
    }

    pub fn available(&mut self) -> u32 {
        self.refill();
        self.tokens as u32
    }
}

#[cfg(test)]
#[cfg(feature = "unit-tests")]
mod tests {
    use super::*;

    #[test]
    fn allows_under_capacity_then_denies() {
        let mut bucket = TokenBucket::new(2, 1);
        assert!(bucket.try_acquire(1));
        assert!(bucket.try_acquire(1));
        assert!(!bucket.try_acquire(1));
    }
}

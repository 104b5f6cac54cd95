//! Delay policy applied between discovery stream attempts that produced no
//! response.

use std::time::Duration;

use rand::Rng;

/// Maps the number of consecutive failed attempts to a wait duration.
pub trait BackoffStrategy: Send + Sync {
    fn backoff(&self, retries: u32) -> Duration;
}

/// Exponential backoff with jitter, using gRPC's connection-backoff defaults.
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub jitter: f64,
    pub max_delay: Duration,
}

impl Default for ExponentialBackoff {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(1),
            multiplier: 1.6,
            jitter: 0.2,
            max_delay: Duration::from_secs(120),
        }
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn backoff(&self, retries: u32) -> Duration {
        if retries == 0 {
            return self.base_delay;
        }
        let max = self.max_delay.as_secs_f64();
        let mut delay = self.base_delay.as_secs_f64();
        let mut remaining = retries;
        while delay < max && remaining > 0 {
            delay *= self.multiplier;
            remaining -= 1;
        }
        delay = delay.min(max);
        // Spread reconnects so a fleet of clients does not hit the server in lockstep.
        delay *= 1.0 + self.jitter * rand::thread_rng().gen_range(-1.0..1.0);
        Duration::try_from_secs_f64(delay.max(0.0)).unwrap_or(self.max_delay)
    }
}

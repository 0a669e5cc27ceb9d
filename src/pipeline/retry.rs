use rand::Rng;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    max_retries: u32,
    current_attempt: u32,
    jitter: bool,
}

#[derive(Debug)]
pub struct MaxRetriesExceeded;

impl std::fmt::Display for MaxRetriesExceeded {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Maximum retry attempts exceeded")
    }
}

impl std::error::Error for MaxRetriesExceeded {}

impl ExponentialBackoff {
    pub fn new(initial_ms: u64, max_ms: u64, retries: u32) -> Self {
        Self {
            initial_delay_ms: initial_ms,
            max_delay_ms: max_ms,
            max_retries: retries,
            current_attempt: 0,
            jitter: true,
        }
    }

    /// Disable the +/-20% jitter (deterministic delays for tests)
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Un-jittered delay before retry number `attempt` (0-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2_u64.saturating_pow(attempt);
        let delay = self.initial_delay_ms.saturating_mul(factor).min(self.max_delay_ms);
        Duration::from_millis(delay)
    }

    pub async fn sleep(&mut self) -> Result<(), MaxRetriesExceeded> {
        if self.current_attempt >= self.max_retries {
            return Err(MaxRetriesExceeded);
        }

        let mut delay = self.delay_for(self.current_attempt);
        if self.jitter {
            let scale = rand::thread_rng().gen_range(0.8..1.2);
            delay = delay.mul_f64(scale);
        }

        log::warn!(
            "⏳ Retry attempt {} of {} in {}ms",
            self.current_attempt + 1,
            self.max_retries,
            delay.as_millis()
        );

        sleep(delay).await;
        self.current_attempt += 1;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.current_attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.current_attempt
    }
}

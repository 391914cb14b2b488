use std::time::Duration;

use super::{AiError, Generation, GenerationRequest, LlmProvider};

/// Fixed backoff schedule: `delays[n]` is slept after failed attempt `n + 1`.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delays: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delays: vec![Duration::from_millis(1_000), Duration::from_millis(2_000)],
        }
    }
}

impl RetryPolicy {
    pub fn immediate() -> Self {
        Self {
            max_attempts: 3,
            delays: vec![],
        }
    }

    fn delay_after(&self, attempt: u32) -> Duration {
        self.delays
            .get(attempt.saturating_sub(1) as usize)
            .or(self.delays.last())
            .copied()
            .unwrap_or(Duration::ZERO)
    }
}

pub async fn generate_with_retry(
    llm: &dyn LlmProvider,
    request: &GenerationRequest,
    policy: &RetryPolicy,
) -> Result<Generation, AiError> {
    let attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match llm.generate(request).await {
            Ok(generation) => return Ok(generation),
            Err(e) if e.is_retryable() && attempt < attempts => {
                let delay = policy.delay_after(attempt);
                tracing::warn!(
                    error = %e,
                    attempt,
                    attempts,
                    delay_ms = delay.as_millis() as u64,
                    "AI generation failed, retrying"
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

use std::time::Duration;

/// Retry, batching, and timeout knobs for the ingestion pipeline (§4.4/§5).
#[derive(Debug, Clone)]
pub struct IngestionTuning {
    pub retry_base_delay_secs: u64,
    pub retry_max_delay_secs: u64,
    pub retry_max_attempts: u32,
    pub embed_batch_size: usize,
    pub embed_sdk_timeout: Duration,
    pub embed_hard_timeout: Duration,
    pub summarization_timeout: Duration,
    pub pdf_extraction_timeout: Duration,
    pub chunk_store_batch_size: usize,
}

impl Default for IngestionTuning {
    fn default() -> Self {
        Self {
            retry_base_delay_secs: 2,
            retry_max_delay_secs: 10,
            retry_max_attempts: 3,
            embed_batch_size: 50,
            embed_sdk_timeout: Duration::from_secs(30),
            embed_hard_timeout: Duration::from_secs(45),
            summarization_timeout: Duration::from_secs(60),
            pdf_extraction_timeout: Duration::from_secs(120),
            chunk_store_batch_size: 50,
        }
    }
}

impl IngestionTuning {
    /// Exponential backoff for attempt `n` (1-based): 2s, 4s, 8s, capped at
    /// `retry_max_delay_secs`. A provider `retry-after` hint overrides this
    /// when present (see call sites in `stages.rs`).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        let computed = self.retry_base_delay_secs.saturating_mul(1u64 << exp.min(16));
        Duration::from_secs(computed.min(self.retry_max_delay_secs))
    }
}

#[derive(Debug, Clone, Default)]
pub struct IngestionConfig {
    pub tuning: IngestionTuning,
}

/// Delay between embedding batches, scaling with global load:
/// `100ms + 50ms * (active_jobs - 1)`, clamped to `[100ms, 300ms]`.
pub fn embed_batch_pacing(active_jobs: usize) -> Duration {
    let extra = 50u64.saturating_mul(u64::try_from(active_jobs.saturating_sub(1)).unwrap_or(u64::MAX));
    let millis = 100u64.saturating_add(extra).clamp(100, 300);
    Duration::from_millis(millis)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_follows_exponential_backoff_capped() {
        let tuning = IngestionTuning::default();
        assert_eq!(tuning.retry_delay(1), Duration::from_secs(2));
        assert_eq!(tuning.retry_delay(2), Duration::from_secs(4));
        assert_eq!(tuning.retry_delay(3), Duration::from_secs(8));
        assert_eq!(tuning.retry_delay(4), Duration::from_secs(10));
    }

    #[test]
    fn embed_batch_pacing_is_clamped() {
        assert_eq!(embed_batch_pacing(1), Duration::from_millis(100));
        assert_eq!(embed_batch_pacing(2), Duration::from_millis(150));
        assert_eq!(embed_batch_pacing(10), Duration::from_millis(300));
        assert_eq!(embed_batch_pacing(100), Duration::from_millis(300));
    }
}

//! Credential pool: rotates, cools, and retires upstream API keys based on
//! observed error signals. All state lives behind a single async mutex; the
//! lock is held only for in-memory transitions, never across a network await.

use std::time::Duration;

use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyStatus {
    Active,
    Cooling,
    Failed,
}

/// Failure classes produced by the caller's classifier and fed into `mark_failure`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Permission-denied, unauthenticated, invalid-argument: no retrying this key.
    Permanent,
    /// Quota exhausted: cool for an extended period.
    Quota,
    /// Anything else retryable: exponential backoff.
    Transient,
}

#[derive(Debug, Clone, Copy)]
pub enum PoolError {
    Conflict,
    NotFound,
    Ambiguous,
}

#[derive(Debug, Clone, Copy)]
pub struct FailureConfig {
    pub base_cooling_period: Duration,
    pub max_retries: u32,
}

impl Default for FailureConfig {
    fn default() -> Self {
        Self {
            base_cooling_period: Duration::from_secs(300),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone)]
struct KeyRecord {
    key: String,
    status: KeyStatus,
    failure_count: u32,
    cooling_until: Option<Instant>,
    last_used: Option<Instant>,
    total_requests: u64,
    successful_requests: u64,
}

impl KeyRecord {
    fn new(key: String) -> Self {
        Self {
            key,
            status: KeyStatus::Active,
            failure_count: 0,
            cooling_until: None,
            last_used: None,
            total_requests: 0,
            successful_requests: 0,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PoolSummary {
    pub active: usize,
    pub cooling: usize,
    pub failed: usize,
}

#[derive(Debug, Serialize)]
pub struct KeyDetail {
    /// Masked form (first 8 + last 4 chars); never the raw key.
    pub key_masked: String,
    pub status: KeyStatus,
    pub failure_count: u32,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub cooling_remaining_secs: Option<u64>,
}

/// An acquired slot. Carries the raw key so the dispatcher can authenticate
/// the upstream call; never log `key` directly, use [`mask_key`].
#[derive(Debug, Clone)]
pub struct AcquiredKey {
    pub key: String,
}

struct PoolState {
    records: Vec<KeyRecord>,
    last_used_index: isize,
}

impl PoolState {
    fn recover(&mut self, now: Instant) {
        for record in &mut self.records {
            if record.status == KeyStatus::Cooling {
                if let Some(until) = record.cooling_until
                    && until <= now
                {
                    record.status = KeyStatus::Active;
                    record.cooling_until = None;
                }
            }
        }
    }
}

pub struct CredentialPool {
    state: Mutex<PoolState>,
}

impl CredentialPool {
    pub fn new(keys: impl IntoIterator<Item = String>) -> Self {
        let records = keys.into_iter().map(KeyRecord::new).collect();
        Self {
            state: Mutex::new(PoolState {
                records,
                last_used_index: -1,
            }),
        }
    }

    pub async fn size(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub fn is_empty(&self) -> bool {
        // Only used at startup before any key is taken; a blocking try_lock is fine here.
        self.state
            .try_lock()
            .map(|state| state.records.is_empty())
            .unwrap_or(false)
    }

    /// Selects the next key per §4.2: lazily recover cooled-down keys, prefer an
    /// active key that has never been used (fair cold start), else round-robin.
    pub async fn acquire(&self) -> Option<AcquiredKey> {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        state.recover(now);

        let active_indices: Vec<usize> = state
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.status == KeyStatus::Active)
            .map(|(i, _)| i)
            .collect();
        if active_indices.is_empty() {
            return None;
        }

        let cold_start = active_indices
            .iter()
            .find(|&&i| state.records[i].last_used.is_none())
            .copied();

        let idx = match cold_start {
            Some(idx) => idx,
            None => {
                state.last_used_index =
                    (state.last_used_index + 1) % active_indices.len() as isize;
                active_indices[state.last_used_index as usize]
            }
        };

        let record = &mut state.records[idx];
        record.last_used = Some(now);
        record.total_requests += 1;
        Some(AcquiredKey {
            key: record.key.clone(),
        })
    }

    pub async fn mark_success(&self, key: &str) {
        let mut state = self.state.lock().await;
        if let Some(record) = state.records.iter_mut().find(|r| r.key == key) {
            record.successful_requests += 1;
            if record.failure_count > 0 {
                record.failure_count -= 1;
            }
        }
    }

    pub async fn mark_failure(&self, key: &str, error: ErrorClass, config: FailureConfig) {
        let mut state = self.state.lock().await;
        let now = Instant::now();
        let Some(record) = state.records.iter_mut().find(|r| r.key == key) else {
            return;
        };

        match error {
            ErrorClass::Permanent => {
                record.status = KeyStatus::Failed;
                record.cooling_until = None;
                tracing::warn!(key = %mask_key(&record.key), "credential marked failed: permanent upstream error");
            }
            ErrorClass::Quota => {
                record.status = KeyStatus::Cooling;
                record.cooling_until = Some(now + config.base_cooling_period * 3);
                tracing::warn!(key = %mask_key(&record.key), "credential cooling: quota exhausted");
            }
            ErrorClass::Transient => {
                record.failure_count += 1;
                if record.failure_count >= config.max_retries {
                    record.status = KeyStatus::Failed;
                    record.cooling_until = None;
                    tracing::warn!(key = %mask_key(&record.key), failure_count = record.failure_count, "credential marked failed: retry budget exhausted");
                } else {
                    let exponent = record.failure_count.saturating_sub(1);
                    let multiplier = 2u32.checked_pow(exponent).unwrap_or(u32::MAX);
                    let backoff = config
                        .base_cooling_period
                        .saturating_mul(multiplier)
                        .min(Duration::from_secs(3600));
                    record.status = KeyStatus::Cooling;
                    record.cooling_until = Some(now + backoff);
                    tracing::warn!(key = %mask_key(&record.key), failure_count = record.failure_count, cooling_secs = backoff.as_secs(), "credential cooling: transient upstream error");
                }
            }
        }
    }

    pub async fn add(&self, key: String) -> Result<(), PoolError> {
        let mut state = self.state.lock().await;
        if state.records.iter().any(|r| r.key == key) {
            return Err(PoolError::Conflict);
        }
        state.records.push(KeyRecord::new(key));
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> Result<(), PoolError> {
        let mut state = self.state.lock().await;
        let before = state.records.len();
        state.records.retain(|r| r.key != key);
        if state.records.len() == before {
            return Err(PoolError::NotFound);
        }
        Ok(())
    }

    /// Resolves `prefix` to the unique matching key and applies `status`.
    /// Setting `Active` clears `cooling_until` and resets `failure_count`.
    pub async fn set_status(&self, prefix: &str, status: KeyStatus) -> Result<(), PoolError> {
        let mut state = self.state.lock().await;
        let matches: Vec<usize> = state
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.key.starts_with(prefix))
            .map(|(i, _)| i)
            .collect();

        match matches.len() {
            0 => Err(PoolError::NotFound),
            1 => {
                let record = &mut state.records[matches[0]];
                record.status = status;
                if status == KeyStatus::Active {
                    record.cooling_until = None;
                    record.failure_count = 0;
                }
                Ok(())
            }
            _ => Err(PoolError::Ambiguous),
        }
    }

    pub async fn summary(&self) -> PoolSummary {
        let state = self.state.lock().await;
        let mut summary = PoolSummary {
            active: 0,
            cooling: 0,
            failed: 0,
        };
        for record in &state.records {
            match record.status {
                KeyStatus::Active => summary.active += 1,
                KeyStatus::Cooling => summary.cooling += 1,
                KeyStatus::Failed => summary.failed += 1,
            }
        }
        summary
    }

    pub async fn detailed(&self) -> Vec<KeyDetail> {
        let state = self.state.lock().await;
        let now = Instant::now();
        state
            .records
            .iter()
            .map(|record| KeyDetail {
                key_masked: mask_key(&record.key),
                status: record.status,
                failure_count: record.failure_count,
                total_requests: record.total_requests,
                successful_requests: record.successful_requests,
                cooling_remaining_secs: record
                    .cooling_until
                    .map(|until| until.saturating_duration_since(now).as_secs()),
            })
            .collect()
    }
}

/// First 8 and last 4 characters, joined by `...`. Never log a raw key.
pub fn mask_key(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 12 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..8].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_robin_fairness() {
        let pool = CredentialPool::new(["K1", "K2", "K3"].map(String::from));
        let mut picks = Vec::new();
        for _ in 0..6 {
            picks.push(pool.acquire().await.unwrap().key);
        }
        assert_eq!(picks, vec!["K1", "K2", "K3", "K1", "K2", "K3"]);
    }

    #[tokio::test(start_paused = true)]
    async fn cooling_and_recovery() {
        let pool = CredentialPool::new(["K1", "K2"].map(String::from));
        let config = FailureConfig {
            base_cooling_period: Duration::from_secs(60),
            max_retries: 3,
        };

        pool.mark_failure("K1", ErrorClass::Transient, config).await;
        assert_eq!(pool.summary().await.cooling, 1);

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(pool.acquire().await.unwrap().key, "K2");

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(pool.acquire().await.unwrap().key, "K1");
    }

    #[tokio::test]
    async fn permanent_failure_never_recovers_automatically() {
        let pool = CredentialPool::new(["K1", "K2"].map(String::from));
        let config = FailureConfig::default();

        pool.mark_failure("K1", ErrorClass::Permanent, config).await;
        for _ in 0..10 {
            assert_eq!(pool.acquire().await.unwrap().key, "K2");
        }

        pool.set_status("K1", KeyStatus::Active).await.unwrap();
        let detail = pool.detailed().await;
        let k1 = detail.iter().find(|d| d.failure_count == 0).unwrap();
        assert_eq!(k1.status, KeyStatus::Active);
    }

    #[tokio::test]
    async fn dispatcher_exhaustion_quota_cools_both_keys() {
        let pool = CredentialPool::new(["K1", "K2"].map(String::from));
        let config = FailureConfig {
            base_cooling_period: Duration::from_secs(10),
            max_retries: 3,
        };

        pool.mark_failure("K1", ErrorClass::Quota, config).await;
        pool.mark_failure("K2", ErrorClass::Quota, config).await;

        let summary = pool.summary().await;
        assert_eq!(summary.cooling, 2);
        assert_eq!(summary.active, 0);

        for detail in pool.detailed().await {
            assert!(detail.cooling_remaining_secs.unwrap() >= 30);
        }
    }

    #[tokio::test]
    async fn success_partially_recovers_failure_count() {
        let pool = CredentialPool::new(["K1"].map(String::from));
        let config = FailureConfig {
            base_cooling_period: Duration::from_secs(1),
            max_retries: 5,
        };
        pool.mark_failure("K1", ErrorClass::Transient, config).await;
        pool.mark_failure("K1", ErrorClass::Transient, config).await;
        pool.set_status("K1", KeyStatus::Active).await.unwrap();
        let before = pool.detailed().await;
        assert_eq!(before[0].failure_count, 0); // set_status(Active) resets it

        pool.mark_failure("K1", ErrorClass::Transient, config).await;
        pool.mark_success("K1").await;
        let after = pool.detailed().await;
        assert_eq!(after[0].failure_count, 0);
    }

    #[test]
    fn masks_long_keys_and_blanks_short_ones() {
        assert_eq!(mask_key("sk-ABCDEFGHIJKLMNOP"), "sk-ABCDE...MNOP");
        assert_eq!(mask_key("short"), "*****");
    }
}

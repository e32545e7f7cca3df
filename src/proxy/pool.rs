//! Egress proxy rotation with per-endpoint health.
//!
//! One pool instance is shared (behind an `Arc`) by every worker of a run. All
//! state transitions happen inside a single lock so concurrent reports never
//! interleave halfway. Nothing here is persisted: the pool is seeded from
//! configuration on every start.

use serde::Serialize;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyState {
    Untested,
    Working,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ProxyRecord {
    pub endpoint: String,
    pub state: ProxyState,
    pub failure_count: u32,
    pub last_failure_at: Option<Instant>,
}

impl ProxyRecord {
    fn new(endpoint: String) -> Self {
        Self {
            endpoint,
            state: ProxyState::Untested,
            failure_count: 0,
            last_failure_at: None,
        }
    }

    /// Failed endpoints sit out a cooldown once they failed more than
    /// `failure_threshold` times; afterwards they are eligible again.
    fn cooling_down(&self, config: &PoolConfig, now: Instant) -> bool {
        if self.state != ProxyState::Failed || self.failure_count <= config.failure_threshold {
            return false;
        }
        match self.last_failure_at {
            Some(at) => now.saturating_duration_since(at) < config.cooldown,
            None => false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub cooldown: Duration,
    pub failure_threshold: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(60 * 60),
            failure_threshold: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub total: usize,
    pub untested: usize,
    pub working: usize,
    pub failed: usize,
}

#[derive(Debug, Default)]
struct PoolState {
    records: Vec<ProxyRecord>,
    working_cursor: usize,
    scan_cursor: usize,
}

impl PoolState {
    fn find_mut(&mut self, endpoint: &str) -> Option<&mut ProxyRecord> {
        self.records.iter_mut().find(|r| r.endpoint == endpoint)
    }
}

#[derive(Debug)]
pub struct ProxyPool {
    config: PoolConfig,
    state: Mutex<PoolState>,
}

impl ProxyPool {
    /// Build a pool from endpoint strings; duplicates keep their first position.
    pub fn new<I, S>(endpoints: I, config: PoolConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut records: Vec<ProxyRecord> = Vec::new();
        for endpoint in endpoints {
            let endpoint = endpoint.into();
            let endpoint = endpoint.trim();
            if endpoint.is_empty() || records.iter().any(|r| r.endpoint == endpoint) {
                continue;
            }
            records.push(ProxyRecord::new(endpoint.to_string()));
        }
        Self {
            config,
            state: Mutex::new(PoolState {
                records,
                ..PoolState::default()
            }),
        }
    }

    pub fn empty(config: PoolConfig) -> Self {
        Self::new(Vec::<String>::new(), config)
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Next endpoint to use, or `None` when nothing is eligible right now.
    pub async fn select(&self) -> Option<ProxyRecord> {
        self.select_at(Instant::now()).await
    }

    pub(crate) async fn select_at(&self, now: Instant) -> Option<ProxyRecord> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        // Known-good endpoints rotate round-robin first.
        let working: Vec<usize> = state
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.state == ProxyState::Working)
            .map(|(i, _)| i)
            .collect();
        if !working.is_empty() {
            let idx = working[state.working_cursor % working.len()];
            state.working_cursor = state.working_cursor.wrapping_add(1);
            return Some(state.records[idx].clone());
        }

        let total = state.records.len();
        for _ in 0..total {
            let idx = state.scan_cursor % total;
            state.scan_cursor = state.scan_cursor.wrapping_add(1);
            let candidate = &state.records[idx];
            if candidate.cooling_down(&self.config, now) {
                continue;
            }
            return Some(candidate.clone());
        }
        None
    }

    pub async fn report_success(&self, endpoint: &str) {
        let mut state = self.state.lock().await;
        if let Some(record) = state.find_mut(endpoint) {
            if record.state != ProxyState::Working {
                debug!(proxy = %record.endpoint, "proxy marked as working");
            }
            record.state = ProxyState::Working;
            record.failure_count = 0;
            record.last_failure_at = None;
        }
    }

    pub async fn report_failure(&self, endpoint: &str) {
        self.report_failure_at(endpoint, Instant::now()).await;
    }

    pub(crate) async fn report_failure_at(&self, endpoint: &str, now: Instant) {
        let mut state = self.state.lock().await;
        if let Some(record) = state.find_mut(endpoint) {
            record.state = ProxyState::Failed;
            record.failure_count = record.failure_count.saturating_add(1);
            record.last_failure_at = Some(now);
            warn!(
                proxy = %record.endpoint,
                failures = record.failure_count,
                "proxy marked as failed"
            );
        }
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        let mut stats = PoolStats {
            total: state.records.len(),
            ..PoolStats::default()
        };
        for r in &state.records {
            match r.state {
                ProxyState::Untested => stats.untested += 1,
                ProxyState::Working => stats.working += 1,
                ProxyState::Failed => stats.failed += 1,
            }
        }
        stats
    }

    pub async fn endpoints(&self) -> Vec<String> {
        let state = self.state.lock().await;
        state.records.iter().map(|r| r.endpoint.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(endpoints: &[&str]) -> ProxyPool {
        ProxyPool::new(endpoints.iter().copied(), PoolConfig::default())
    }

    #[tokio::test]
    async fn empty_pool_selects_none() {
        let p = ProxyPool::empty(PoolConfig::default());
        assert!(p.select().await.is_none());
        assert!(p.is_empty().await);
    }

    #[tokio::test]
    async fn untested_endpoints_rotate_in_order() {
        let p = pool(&["http://a:1", "http://b:1", "http://a:1"]);
        assert_eq!(p.len().await, 2);
        assert_eq!(p.select().await.unwrap().endpoint, "http://a:1");
        assert_eq!(p.select().await.unwrap().endpoint, "http://b:1");
        assert_eq!(p.select().await.unwrap().endpoint, "http://a:1");
    }

    #[tokio::test]
    async fn working_endpoints_are_preferred() {
        let p = pool(&["http://a:1", "http://b:1", "http://c:1"]);
        p.report_success("http://c:1").await;
        for _ in 0..3 {
            assert_eq!(p.select().await.unwrap().endpoint, "http://c:1");
        }
        p.report_success("http://a:1").await;
        let picks: Vec<String> = [
            p.select().await.unwrap().endpoint,
            p.select().await.unwrap().endpoint,
        ]
        .into();
        assert!(picks.contains(&"http://a:1".to_string()));
        assert!(picks.contains(&"http://c:1".to_string()));
    }

    #[tokio::test]
    async fn failing_endpoint_cools_down_after_threshold() {
        let p = pool(&["http://a:1"]);
        let t0 = Instant::now();
        // up to the threshold the endpoint stays eligible
        p.report_failure_at("http://a:1", t0).await;
        p.report_failure_at("http://a:1", t0).await;
        assert!(p.select_at(t0).await.is_some());
        p.report_failure_at("http://a:1", t0).await;
        assert!(p.select_at(t0 + Duration::from_secs(60)).await.is_none());
        let later = p.select_at(t0 + Duration::from_secs(60 * 60 + 1)).await;
        assert_eq!(later.unwrap().failure_count, 3);
    }

    #[tokio::test]
    async fn success_clears_failure_history() {
        let p = pool(&["http://a:1", "http://b:1"]);
        for _ in 0..5 {
            p.report_failure("http://a:1").await;
        }
        p.report_success("http://a:1").await;
        let stats = p.stats().await;
        assert_eq!(stats.working, 1);
        assert_eq!(stats.untested, 1);
        assert_eq!(stats.failed, 0);
        let rec = p.select().await.unwrap();
        assert_eq!(rec.endpoint, "http://a:1");
        assert_eq!(rec.failure_count, 0);
    }

    #[tokio::test]
    async fn working_endpoint_that_fails_leaves_rotation() {
        let p = pool(&["http://a:1", "http://b:1"]);
        p.report_success("http://a:1").await;
        p.report_failure("http://a:1").await;
        // no working endpoints left: scan over all, a is below threshold so still eligible
        let stats = p.stats().await;
        assert_eq!(stats.working, 0);
        assert_eq!(stats.failed, 1);
        assert!(p.select().await.is_some());
    }
}

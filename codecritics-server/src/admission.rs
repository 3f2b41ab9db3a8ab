//! Repository allow-list and per-key rate limiting.
//!
//! The limiter and the allow-list are the only mutable process-wide state in
//! the service. The table is bounded; under pressure expired windows are
//! evicted first, then the window closest to expiry.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::event::RepoRef;
use crate::outcome::Trigger;

/// Reviews admitted per key per window.
pub const DEFAULT_MAX_PER_WINDOW: u32 = 10;
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60 * 60);
/// Upper bound on tracked keys.
pub const DEFAULT_MAX_KEYS: usize = 10_000;

/// Manual triggers get an independent budget under a derived key.
const MANUAL_KEY_SUFFIX: &str = "#manual";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDecision {
    Admitted,
    /// Repository is not on the allow-list. Silent, internal.
    Disallowed,
    /// Budget exhausted for this key. User-visible.
    RateLimited,
}

#[derive(Debug, Clone, Copy)]
struct RateLimitEntry {
    count: u32,
    window_reset_at: Instant,
}

pub struct AdmissionController {
    /// Empty means every repository is admitted.
    allowed_repositories: Vec<String>,
    entries: Mutex<HashMap<String, RateLimitEntry>>,
    max_per_window: u32,
    window: Duration,
    max_keys: usize,
}

impl AdmissionController {
    pub fn new(allowed_repositories: Vec<String>) -> Self {
        Self {
            allowed_repositories,
            entries: Mutex::new(HashMap::new()),
            max_per_window: DEFAULT_MAX_PER_WINDOW,
            window: DEFAULT_WINDOW,
            max_keys: DEFAULT_MAX_KEYS,
        }
    }

    /// Override the default budget. Mostly for tests and local tuning.
    pub fn with_limits(mut self, max_per_window: u32, window: Duration, max_keys: usize) -> Self {
        self.max_per_window = max_per_window;
        self.window = window;
        self.max_keys = max_keys;
        self
    }

    /// Rate-limit key for a repository and trigger kind.
    pub fn key_for(repo: &RepoRef, trigger: Trigger) -> String {
        match trigger {
            Trigger::Auto => repo.full_name.clone(),
            Trigger::Manual => format!("{}{}", repo.full_name, MANUAL_KEY_SUFFIX),
        }
    }

    /// Allow-list check followed by the rate-limit check. Order matters: a
    /// disallowed repository never consumes budget.
    pub fn admit(&self, repo: &RepoRef, trigger: Trigger) -> AdmissionDecision {
        if !self.allowed_repositories.is_empty()
            && !self.allowed_repositories.contains(&repo.full_name)
        {
            debug!(repo = %repo.full_name, "repository not on allow-list");
            return AdmissionDecision::Disallowed;
        }

        if self.try_acquire(&Self::key_for(repo, trigger)) {
            AdmissionDecision::Admitted
        } else {
            AdmissionDecision::RateLimited
        }
    }

    /// Consume one unit of budget for `key`. Counts reset exactly at the
    /// window boundary.
    fn try_acquire(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = self.entries.lock().expect("rate limit table poisoned");

        if let Some(entry) = entries.get_mut(key) {
            if now >= entry.window_reset_at {
                entry.count = 1;
                entry.window_reset_at = now + self.window;
                return true;
            }
            if entry.count < self.max_per_window {
                entry.count += 1;
                return true;
            }
            return false;
        }

        if entries.len() >= self.max_keys {
            Self::evict(&mut entries, now);
        }
        entries.insert(
            key.to_string(),
            RateLimitEntry {
                count: 1,
                window_reset_at: now + self.window,
            },
        );
        true
    }

    /// Drop expired entries; if none were expired, drop the entry closest to
    /// expiry so the table never grows past its bound.
    fn evict(entries: &mut HashMap<String, RateLimitEntry>, now: Instant) {
        let before = entries.len();
        entries.retain(|_, e| now < e.window_reset_at);
        if entries.len() < before {
            debug!(evicted = before - entries.len(), "evicted expired rate-limit entries");
            return;
        }

        if let Some(oldest) = entries
            .iter()
            .min_by_key(|(_, e)| e.window_reset_at)
            .map(|(k, _)| k.clone())
        {
            warn!(key = %oldest, "rate-limit table full, evicting live entry");
            entries.remove(&oldest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(full_name: &str) -> RepoRef {
        let (owner, name) = full_name.split_once('/').unwrap();
        RepoRef {
            owner: owner.to_string(),
            name: name.to_string(),
            full_name: full_name.to_string(),
            private: false,
        }
    }

    #[test]
    fn test_empty_allow_list_admits_everyone() {
        let controller = AdmissionController::new(Vec::new());
        assert_eq!(
            controller.admit(&repo("alice/repo"), Trigger::Auto),
            AdmissionDecision::Admitted
        );
    }

    #[test]
    fn test_allow_list_rejects_unlisted_repo() {
        let controller = AdmissionController::new(vec!["alice/repo".to_string()]);
        assert_eq!(
            controller.admit(&repo("alice/repo"), Trigger::Auto),
            AdmissionDecision::Admitted
        );
        assert_eq!(
            controller.admit(&repo("mallory/repo"), Trigger::Auto),
            AdmissionDecision::Disallowed
        );
    }

    #[test]
    fn test_rate_limit_exhausts_then_refuses() {
        let controller =
            AdmissionController::new(Vec::new()).with_limits(3, Duration::from_secs(3600), 100);
        let r = repo("alice/repo");
        for _ in 0..3 {
            assert_eq!(controller.admit(&r, Trigger::Auto), AdmissionDecision::Admitted);
        }
        assert_eq!(
            controller.admit(&r, Trigger::Auto),
            AdmissionDecision::RateLimited
        );
    }

    #[test]
    fn test_manual_budget_is_independent() {
        let controller =
            AdmissionController::new(Vec::new()).with_limits(1, Duration::from_secs(3600), 100);
        let r = repo("alice/repo");
        assert_eq!(controller.admit(&r, Trigger::Auto), AdmissionDecision::Admitted);
        assert_eq!(
            controller.admit(&r, Trigger::Auto),
            AdmissionDecision::RateLimited
        );
        // The manual key still has budget.
        assert_eq!(
            controller.admit(&r, Trigger::Manual),
            AdmissionDecision::Admitted
        );
    }

    #[test]
    fn test_count_resets_at_window_boundary() {
        let controller =
            AdmissionController::new(Vec::new()).with_limits(1, Duration::from_millis(20), 100);
        let r = repo("alice/repo");
        assert_eq!(controller.admit(&r, Trigger::Auto), AdmissionDecision::Admitted);
        assert_eq!(
            controller.admit(&r, Trigger::Auto),
            AdmissionDecision::RateLimited
        );
        std::thread::sleep(Duration::from_millis(25));
        assert_eq!(controller.admit(&r, Trigger::Auto), AdmissionDecision::Admitted);
    }

    #[test]
    fn test_distinct_repos_have_distinct_budgets() {
        let controller =
            AdmissionController::new(Vec::new()).with_limits(1, Duration::from_secs(3600), 100);
        assert_eq!(
            controller.admit(&repo("alice/one"), Trigger::Auto),
            AdmissionDecision::Admitted
        );
        assert_eq!(
            controller.admit(&repo("alice/two"), Trigger::Auto),
            AdmissionDecision::Admitted
        );
    }

    #[test]
    fn test_table_stays_bounded_under_pressure() {
        let controller =
            AdmissionController::new(Vec::new()).with_limits(1, Duration::from_secs(3600), 5);
        for i in 0..50 {
            let r = repo(&format!("owner/repo{i}"));
            assert_eq!(controller.admit(&r, Trigger::Auto), AdmissionDecision::Admitted);
        }
        let len = controller.entries.lock().unwrap().len();
        assert!(len <= 5 + 1, "table grew to {len}");
    }

    #[test]
    fn test_key_for_derivation() {
        let r = repo("alice/repo");
        assert_eq!(AdmissionController::key_for(&r, Trigger::Auto), "alice/repo");
        assert_eq!(
            AdmissionController::key_for(&r, Trigger::Manual),
            "alice/repo#manual"
        );
    }
}

//! Runtime configuration for the linking pipeline, the narrative drain and
//! the in-process scheduler.

use std::str::FromStr;

use chrono::Duration;

use evidentia_core::defaults;

/// Parse an environment variable, falling back to `default` when it is unset
/// or unparsable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<T>().ok())
        .unwrap_or(default)
}

fn env_flag(key: &str, default: bool) -> bool {
    std::env::var(key)
        .map(|v| v != "false" && v != "0")
        .unwrap_or(default)
}

/// Configuration for the evidence linking engine.
#[derive(Debug, Clone)]
pub struct LinkingConfig {
    /// Maximum link attempts per project per rolling 24h window.
    pub daily_cap: i64,
    /// Maximum candidates sent to the classifier per project per run.
    pub batch_limit: usize,
    /// Minimum sanitized content length in characters.
    pub min_content_chars: usize,
    pub recency_window_days: i64,
    pub backfill_window_days: i64,
    pub success_cooldown_hours: i64,
    pub retry_cooldown_minutes: i64,
    /// Inclusive minimum rule score for an accepted link.
    pub rule_score_threshold: f64,
    /// Projects processed concurrently.
    pub project_concurrency: usize,
    pub classify_timeout_secs: u64,
}

impl Default for LinkingConfig {
    fn default() -> Self {
        Self {
            daily_cap: defaults::DAILY_LINK_CAP,
            batch_limit: defaults::LINK_BATCH_LIMIT,
            min_content_chars: defaults::MIN_CONTENT_CHARS,
            recency_window_days: defaults::RECENCY_WINDOW_DAYS,
            backfill_window_days: defaults::BACKFILL_WINDOW_DAYS,
            success_cooldown_hours: defaults::SUCCESS_COOLDOWN_HOURS,
            retry_cooldown_minutes: defaults::RETRY_COOLDOWN_MINUTES,
            rule_score_threshold: defaults::RULE_SCORE_THRESHOLD,
            project_concurrency: defaults::LINK_PROJECT_CONCURRENCY,
            classify_timeout_secs: defaults::CLASSIFY_TIMEOUT_SECS,
        }
    }
}

impl LinkingConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `LINK_DAILY_CAP` | `100` | Link attempts per project per 24h |
    /// | `LINK_BATCH_LIMIT` | `25` | Candidates per project per run |
    /// | `LINK_PROJECT_CONCURRENCY` | `4` | Projects linked concurrently |
    /// | `LINK_CLASSIFY_TIMEOUT_SECS` | `10` | Classifier deadline |
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            daily_cap: env_or("LINK_DAILY_CAP", base.daily_cap).max(0),
            batch_limit: env_or("LINK_BATCH_LIMIT", base.batch_limit),
            project_concurrency: env_or("LINK_PROJECT_CONCURRENCY", base.project_concurrency)
                .max(1),
            classify_timeout_secs: env_or("LINK_CLASSIFY_TIMEOUT_SECS", base.classify_timeout_secs),
            ..base
        }
    }

    pub fn with_daily_cap(mut self, cap: i64) -> Self {
        self.daily_cap = cap;
        self
    }

    pub fn with_batch_limit(mut self, limit: usize) -> Self {
        self.batch_limit = limit;
        self
    }

    pub fn with_rule_score_threshold(mut self, threshold: f64) -> Self {
        self.rule_score_threshold = threshold;
        self
    }

    pub fn with_project_concurrency(mut self, concurrency: usize) -> Self {
        self.project_concurrency = concurrency.max(1);
        self
    }

    pub fn with_classify_timeout_secs(mut self, secs: u64) -> Self {
        self.classify_timeout_secs = secs;
        self
    }

    pub fn recency_window(&self) -> Duration {
        Duration::days(self.recency_window_days)
    }

    pub fn backfill_window(&self) -> Duration {
        Duration::days(self.backfill_window_days)
    }

    pub fn success_cooldown(&self) -> Duration {
        Duration::hours(self.success_cooldown_hours)
    }

    pub fn retry_cooldown(&self) -> Duration {
        Duration::minutes(self.retry_cooldown_minutes)
    }
}

/// Configuration for the narrative drain.
#[derive(Debug, Clone)]
pub struct NarrativeConfig {
    /// Maximum jobs claimed per run.
    pub batch_size: i64,
    pub daily_snippet_cap: i64,
    /// Estimated snippets consumed by one generated narrative.
    pub snippets_per_narrative: i64,
    pub snippets_per_step: usize,
    pub snippet_chars: usize,
    /// Seconds before an unreleased claim can be taken again.
    pub claim_lease_secs: i64,
    pub project_concurrency: usize,
    pub generate_timeout_secs: u64,
}

impl Default for NarrativeConfig {
    fn default() -> Self {
        Self {
            batch_size: defaults::NARRATIVE_BATCH_SIZE,
            daily_snippet_cap: defaults::DAILY_SNIPPET_CAP,
            snippets_per_narrative: defaults::SNIPPETS_PER_NARRATIVE,
            snippets_per_step: defaults::SNIPPETS_PER_STEP,
            snippet_chars: defaults::NARRATIVE_SNIPPET_CHARS,
            claim_lease_secs: defaults::NARRATIVE_CLAIM_LEASE_SECS,
            project_concurrency: defaults::NARRATIVE_PROJECT_CONCURRENCY,
            generate_timeout_secs: defaults::NARRATIVE_TIMEOUT_SECS,
        }
    }
}

impl NarrativeConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `NARRATIVE_BATCH_SIZE` | `10` | Jobs claimed per drain |
    /// | `NARRATIVE_DAILY_SNIPPET_CAP` | `80` | Snippet budget per project per 24h |
    /// | `NARRATIVE_CLAIM_LEASE_SECS` | `300` | Claim lease |
    /// | `NARRATIVE_TIMEOUT_SECS` | `15` | Generator deadline |
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            batch_size: env_or("NARRATIVE_BATCH_SIZE", base.batch_size).max(1),
            daily_snippet_cap: env_or("NARRATIVE_DAILY_SNIPPET_CAP", base.daily_snippet_cap),
            claim_lease_secs: env_or("NARRATIVE_CLAIM_LEASE_SECS", base.claim_lease_secs),
            generate_timeout_secs: env_or("NARRATIVE_TIMEOUT_SECS", base.generate_timeout_secs),
            ..base
        }
    }

    pub fn with_batch_size(mut self, size: i64) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_daily_snippet_cap(mut self, cap: i64) -> Self {
        self.daily_snippet_cap = cap;
        self
    }

    pub fn with_generate_timeout_secs(mut self, secs: u64) -> Self {
        self.generate_timeout_secs = secs;
        self
    }

    pub fn claim_lease(&self) -> Duration {
        Duration::seconds(self.claim_lease_secs)
    }
}

/// Configuration for the in-process scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub link_interval_secs: u64,
    pub narrative_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            link_interval_secs: defaults::LINK_INTERVAL_SECS,
            narrative_interval_secs: defaults::NARRATIVE_INTERVAL_SECS,
        }
    }
}

impl SchedulerConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `SCHEDULER_ENABLED` | `false` | Run the pipeline in-process |
    /// | `LINK_INTERVAL_SECS` | `900` | Seconds between linking runs |
    /// | `NARRATIVE_INTERVAL_SECS` | `300` | Seconds between narrative drains |
    ///
    /// The scheduler is opt-in from the environment; deployments normally
    /// drive both steps through the cron endpoints.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            enabled: env_flag("SCHEDULER_ENABLED", false),
            link_interval_secs: env_or("LINK_INTERVAL_SECS", base.link_interval_secs).max(1),
            narrative_interval_secs: env_or("NARRATIVE_INTERVAL_SECS", base.narrative_interval_secs)
                .max(1),
        }
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_link_interval(mut self, secs: u64) -> Self {
        self.link_interval_secs = secs;
        self
    }

    pub fn with_narrative_interval(mut self, secs: u64) -> Self {
        self.narrative_interval_secs = secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linking_config_defaults() {
        let config = LinkingConfig::default();
        assert_eq!(config.daily_cap, 100);
        assert_eq!(config.batch_limit, 25);
        assert_eq!(config.min_content_chars, 20);
        assert_eq!(config.recency_window(), Duration::days(60));
        assert_eq!(config.backfill_window(), Duration::days(14));
        assert_eq!(config.success_cooldown(), Duration::hours(24));
        assert_eq!(config.retry_cooldown(), Duration::hours(1));
        assert!((config.rule_score_threshold - 0.10).abs() < f64::EPSILON);
    }

    #[test]
    fn test_linking_config_builder() {
        let config = LinkingConfig::default()
            .with_daily_cap(5)
            .with_batch_limit(2)
            .with_project_concurrency(0);
        assert_eq!(config.daily_cap, 5);
        assert_eq!(config.batch_limit, 2);
        assert_eq!(config.project_concurrency, 1);
    }

    #[test]
    fn test_narrative_config_defaults() {
        let config = NarrativeConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.daily_snippet_cap, 80);
        assert_eq!(config.snippets_per_narrative, 15);
        assert_eq!(config.snippets_per_step, 3);
        assert_eq!(config.snippet_chars, 280);
        assert_eq!(config.claim_lease(), Duration::seconds(300));
    }

    #[test]
    fn test_scheduler_config_builder() {
        let config = SchedulerConfig::default()
            .with_enabled(false)
            .with_link_interval(60)
            .with_narrative_interval(30);
        assert!(!config.enabled);
        assert_eq!(config.link_interval_secs, 60);
        assert_eq!(config.narrative_interval_secs, 30);
    }
}

//! Configuration struct definitions.
//!
//! Every section is `#[serde(default)]` so that a partial table in a user or
//! project file deserializes. The authoritative defaults live in the embedded
//! `defaults.toml`; the `Default` impls here only cover sections loaded from a
//! single file without layering.

use serde::{Deserialize, Serialize};
use slb_core::{ConflictResolution, RateLimitAction, RiskTier, TimeoutAction};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration for SLB.
///
/// Produced once at startup by [`crate::loader::load`] and never re-read.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Quorum, timeout and execution knobs.
    pub general: GeneralConfig,
    /// Per-session request limits.
    pub rate_limits: RateLimitsConfig,
    /// Ledger and audit retention.
    pub history: HistoryConfig,
    /// Agent allow/deny lists.
    pub agents: AgentsConfig,
    /// Log level, format and per-crate directives.
    pub logging: LoggingSection,
    /// Risk tier pattern sets.
    pub patterns: PatternsConfig,
}

impl Config {
    /// Approval lifetime for a tier, in seconds.
    #[must_use]
    pub fn approval_ttl_secs(&self, tier: RiskTier) -> u64 {
        let minutes = if tier == RiskTier::Critical {
            self.general.approval_ttl_critical_minutes
        } else {
            self.general.approval_ttl_minutes
        };
        minutes.saturating_mul(60)
    }

    /// Whether `agent` is on the blocked list (case-insensitive).
    #[must_use]
    pub fn is_blocked(&self, agent: &str) -> bool {
        contains_ignore_case(&self.agents.blocked, agent)
    }

    /// Whether `agent` may approve its own requests after the trust delay.
    #[must_use]
    pub fn is_trusted_self_approver(&self, agent: &str) -> bool {
        contains_ignore_case(&self.agents.trusted_self_approve, agent)
    }

    /// Whether `agent` is configured as a human reviewer.
    #[must_use]
    pub fn is_human_agent(&self, agent: &str) -> bool {
        contains_ignore_case(&self.agents.human, agent)
            || contains_ignore_case(&self.general.review_pool, agent)
    }
}

fn contains_ignore_case(list: &[String], name: &str) -> bool {
    list.iter().any(|entry| entry.eq_ignore_ascii_case(name))
}

// ---------------------------------------------------------------------------
// GeneralConfig
// ---------------------------------------------------------------------------

/// Core behaviour knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Hold back same-model reviews for every tier (Critical always does).
    pub require_different_model: bool,
    /// Seconds after creation when same-model reviews start to count.
    pub different_model_timeout: u64,
    /// Policy for mixed votes.
    pub conflict_resolution: ConflictResolution,
    /// Seconds a request may stay pending.
    pub request_timeout: u64,
    /// Minutes an approval stays executable.
    pub approval_ttl_minutes: u64,
    /// Minutes a Critical approval stays executable.
    pub approval_ttl_critical_minutes: u64,
    /// What happens at the request deadline.
    pub timeout_action: TimeoutAction,
    /// Record a non-destructive preview of supported commands.
    pub enable_dry_run: bool,
    /// Snapshot state before executing.
    pub enable_rollback_capture: bool,
    /// Snapshot size cap in MiB.
    pub max_rollback_size_mb: u64,
    /// Allow reviewing requests from other projects.
    pub cross_project_reviews: bool,
    /// Agents who review on behalf of humans; also counted as human.
    pub review_pool: Vec<String>,
    /// Tier assigned when no pattern matches.
    pub default_tier: RiskTier,
    /// Fraction of `request_timeout` after which dynamic quorum may relax.
    pub dynamic_quorum_fraction: f64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            require_different_model: false,
            different_model_timeout: 300,
            conflict_resolution: ConflictResolution::AnyRejectionBlocks,
            request_timeout: 1800,
            approval_ttl_minutes: 30,
            approval_ttl_critical_minutes: 10,
            timeout_action: TimeoutAction::Escalate,
            enable_dry_run: true,
            enable_rollback_capture: true,
            max_rollback_size_mb: 100,
            cross_project_reviews: false,
            review_pool: Vec::new(),
            default_tier: RiskTier::Caution,
            dynamic_quorum_fraction: 0.5,
        }
    }
}

// ---------------------------------------------------------------------------
// RateLimitsConfig
// ---------------------------------------------------------------------------

/// Per-session rate limits. A limit of zero disables that check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitsConfig {
    /// Cap on concurrently pending requests per session.
    pub max_pending_per_session: u32,
    /// Cap on requests per sliding minute per session.
    pub max_requests_per_minute: u32,
    /// Behaviour on breach.
    pub rate_limit_action: RateLimitAction,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            max_pending_per_session: 5,
            max_requests_per_minute: 10,
            rate_limit_action: RateLimitAction::Reject,
        }
    }
}

// ---------------------------------------------------------------------------
// HistoryConfig
// ---------------------------------------------------------------------------

/// Ledger location and retention.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Override for the ledger path. `None` uses `<project>/.slb/state.db`.
    pub database_path: Option<String>,
    /// Days audit entries are kept.
    pub retention_days: u32,
    /// Days rollback captures are kept.
    pub rollback_retention_days: u32,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            retention_days: 365,
            rollback_retention_days: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// AgentsConfig
// ---------------------------------------------------------------------------

/// Agent allow and deny lists. Names match case-insensitively.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentsConfig {
    /// Agents allowed to approve their own requests after a delay.
    pub trusted_self_approve: Vec<String>,
    /// Delay before a trusted self-approval counts, in seconds.
    pub trusted_self_approve_delay_seconds: u64,
    /// Agents that may not open requests.
    pub blocked: Vec<String>,
    /// Agent names treated as human reviewers.
    pub human: Vec<String>,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            trusted_self_approve: Vec::new(),
            trusted_self_approve_delay_seconds: 300,
            blocked: Vec::new(),
            human: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"` through `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `["slb_storage=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "warn".to_owned(),
            format: "compact".to_owned(),
            directives: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Patterns
// ---------------------------------------------------------------------------

/// The four pattern tiers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternsConfig {
    /// Critical tier.
    pub critical: PatternTier,
    /// Dangerous tier.
    pub dangerous: PatternTier,
    /// Caution tier.
    pub caution: PatternTier,
    /// Safe tier.
    pub safe: PatternTier,
}

impl PatternsConfig {
    /// The tier configuration for `tier`.
    #[must_use]
    pub fn tier(&self, tier: RiskTier) -> &PatternTier {
        match tier {
            RiskTier::Critical => &self.critical,
            RiskTier::Dangerous => &self.dangerous,
            RiskTier::Caution => &self.caution,
            RiskTier::Safe => &self.safe,
        }
    }

    /// Mutable access, for tests and flag overrides.
    pub fn tier_mut(&mut self, tier: RiskTier) -> &mut PatternTier {
        match tier {
            RiskTier::Critical => &mut self.critical,
            RiskTier::Dangerous => &mut self.dangerous,
            RiskTier::Caution => &mut self.caution,
            RiskTier::Safe => &mut self.safe,
        }
    }
}

/// An ordered pattern set plus its approval requirements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PatternTier {
    /// Approvals needed.
    pub min_approvals: u32,
    /// Whether quorum may relax for pending requests short of reviewers.
    pub dynamic_quorum: bool,
    /// Lowest quorum reachable by relaxation.
    pub dynamic_quorum_floor: u32,
    /// Soft approval window in seconds.
    pub auto_approve_delay_seconds: u64,
    /// Regular expressions, tested in order.
    pub patterns: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_ttl_is_shorter() {
        let cfg = Config::default();
        assert_eq!(cfg.approval_ttl_secs(RiskTier::Critical), 600);
        assert_eq!(cfg.approval_ttl_secs(RiskTier::Dangerous), 1800);
    }

    #[test]
    fn test_agent_lists_ignore_case() {
        let mut cfg = Config::default();
        cfg.agents.blocked.push("RogueBot".into());
        cfg.general.review_pool.push("Alice".into());
        assert!(cfg.is_blocked("roguebot"));
        assert!(!cfg.is_blocked("GoodBot"));
        assert!(cfg.is_human_agent("ALICE"));
        assert!(!cfg.is_trusted_self_approver("alice"));
    }

    #[test]
    fn test_partial_section_keeps_other_defaults() {
        let cfg: Config = toml::from_str("[general]\nrequest_timeout = 60\n").unwrap();
        assert_eq!(cfg.general.request_timeout, 60);
        assert_eq!(cfg.general.approval_ttl_minutes, 30);
        assert_eq!(cfg.rate_limits.max_requests_per_minute, 10);
    }
}

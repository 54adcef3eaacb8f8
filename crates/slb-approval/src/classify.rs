//! Risk classification.
//!
//! The [`RiskClassifier`] compiles the four configured pattern tiers once and
//! then maps commands to tiers as a pure function. Each normalized segment is
//! tested against Critical, Dangerous, Caution and Safe in that order; the
//! first tier with a matching pattern is the segment's tier, and the command
//! takes the most severe tier among its segments.
//!
//! A segment that matches nothing is assigned the configured default tier
//! (Caution unless overridden), and a warning is logged: unknown commands are
//! reviewed, not waved through.

use regex::Regex;
use serde::Serialize;
use tracing::warn;

use slb_config::{Config, PatternsConfig};
use slb_core::RiskTier;

use crate::error::{ApprovalError, ApprovalResult};
use crate::normalize::{NormalizedCommand, normalize};

/// The result of classifying one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// Assigned tier.
    pub tier: RiskTier,
    /// The pattern that decided the tier, when one did.
    pub matched_pattern: Option<String>,
    /// The segment that decided the tier.
    pub matched_segment: Option<String>,
    /// Whether the default tier was applied to some segment.
    pub defaulted: bool,
    /// The normalized command that was classified.
    pub normalized: NormalizedCommand,
}

#[derive(Debug, Clone)]
struct CompiledTier {
    tier: RiskTier,
    patterns: Vec<Regex>,
}

/// Maps command lines to risk tiers.
#[derive(Debug, Clone)]
pub struct RiskClassifier {
    tiers: Vec<CompiledTier>,
    default_tier: RiskTier,
}

impl RiskClassifier {
    /// Compile the pattern tiers.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Config`] naming the first pattern that does not compile.
    pub fn new(patterns: &PatternsConfig, default_tier: RiskTier) -> ApprovalResult<Self> {
        let mut tiers = Vec::with_capacity(RiskTier::PRIORITY.len());
        for tier in RiskTier::PRIORITY {
            let compiled = patterns
                .tier(tier)
                .patterns
                .iter()
                .map(|p| {
                    Regex::new(p).map_err(|e| {
                        ApprovalError::Config(format!("patterns.{tier}: invalid pattern {p:?}: {e}"))
                    })
                })
                .collect::<ApprovalResult<Vec<_>>>()?;
            tiers.push(CompiledTier {
                tier,
                patterns: compiled,
            });
        }
        Ok(Self {
            tiers,
            default_tier,
        })
    }

    /// Build from a loaded configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalError::Config`] if a pattern does not compile.
    pub fn from_config(config: &Config) -> ApprovalResult<Self> {
        Self::new(&config.patterns, config.general.default_tier)
    }

    /// Tier applied to commands no pattern recognises.
    #[must_use]
    pub fn default_tier(&self) -> RiskTier {
        self.default_tier
    }

    /// Just the tier for `command`.
    #[must_use]
    pub fn tier_of(&self, command: &str) -> RiskTier {
        self.classify(command).tier
    }

    /// Classify `command`.
    #[must_use]
    pub fn classify(&self, command: &str) -> Classification {
        let normalized = normalize(command);
        let mut best: Option<(RiskTier, Option<String>, String)> = None;
        let mut defaulted = false;

        for segment in &normalized.segments {
            let (tier, pattern) = match self.match_segment(segment) {
                Some((tier, pattern)) => (tier, Some(pattern.to_string())),
                None => {
                    defaulted = true;
                    (self.default_tier, None)
                },
            };
            let more_severe = best
                .as_ref()
                .is_none_or(|(current, ..)| tier.severity() > current.severity());
            if more_severe {
                best = Some((tier, pattern, segment.clone()));
            }
        }

        // Normalization can lose text that a pattern cares about (a quoted
        // SQL statement, say); the raw line gets a say as well.
        let raw = command.trim();
        if !raw.is_empty() {
            if let Some((tier, pattern)) = self.match_segment(raw) {
                let more_severe = best
                    .as_ref()
                    .is_none_or(|(current, ..)| tier.severity() > current.severity());
                if more_severe {
                    best = Some((tier, Some(pattern.to_string()), raw.to_string()));
                }
            }
        }

        let (mut tier, matched_pattern, matched_segment) = match best {
            Some((tier, pattern, segment)) => (tier, pattern, Some(segment)),
            None => {
                defaulted = true;
                (self.default_tier, None, None)
            },
        };

        if normalized.is_opaque() && self.default_tier.severity() > tier.severity() {
            tier = self.default_tier;
            defaulted = true;
        }

        if defaulted {
            warn!(
                command = %crate::redact::redact(command),
                default_tier = %self.default_tier,
                tier = %tier,
                "No pattern matched part of the command; default tier applied"
            );
        }

        Classification {
            tier,
            matched_pattern,
            matched_segment,
            defaulted,
            normalized,
        }
    }

    fn match_segment(&self, segment: &str) -> Option<(RiskTier, &str)> {
        self.tiers.iter().find_map(|compiled| {
            compiled
                .patterns
                .iter()
                .find(|re| re.is_match(segment))
                .map(|re| (compiled.tier, re.as_str()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builtin() -> RiskClassifier {
        RiskClassifier::from_config(&Config::builtin().unwrap()).unwrap()
    }

    #[test]
    fn test_builtin_tiers() {
        let c = builtin();
        assert_eq!(c.tier_of("rm -rf /etc"), RiskTier::Critical);
        assert_eq!(c.tier_of("rm -rf /home/user/project"), RiskTier::Critical);
        assert_eq!(c.tier_of("terraform destroy"), RiskTier::Critical);
        assert_eq!(c.tier_of("git push --force origin main"), RiskTier::Critical);
        assert_eq!(c.tier_of("psql -c 'DROP DATABASE production'"), RiskTier::Critical);
        assert_eq!(c.tier_of("rm -rf ./build"), RiskTier::Dangerous);
        assert_eq!(c.tier_of("git reset --hard HEAD~1"), RiskTier::Dangerous);
        assert_eq!(c.tier_of("kubectl delete deployment nginx"), RiskTier::Dangerous);
        assert_eq!(c.tier_of("npm uninstall express"), RiskTier::Caution);
        assert_eq!(c.tier_of("npm cache clean"), RiskTier::Safe);
        assert_eq!(c.tier_of("git stash"), RiskTier::Safe);
    }

    #[test]
    fn test_priority_order_beats_safe() {
        // Both the caution `^rm\s+[^-]` and the safe `\.log$` pattern match.
        let c = builtin();
        assert_eq!(c.tier_of("rm old.log"), RiskTier::Caution);
    }

    #[test]
    fn test_unmatched_command_gets_default_tier() {
        let c = builtin();
        let result = c.classify("ls -la");
        assert_eq!(result.tier, RiskTier::Caution);
        assert!(result.defaulted);
        assert!(result.matched_pattern.is_none());
    }

    #[test]
    fn test_default_tier_is_configurable() {
        let mut cfg = Config::builtin().unwrap();
        cfg.general.default_tier = RiskTier::Safe;
        let c = RiskClassifier::from_config(&cfg).unwrap();
        assert_eq!(c.tier_of("ls -la"), RiskTier::Safe);
    }

    #[test]
    fn test_most_severe_segment_wins() {
        let c = builtin();
        let result = c.classify("npm cache clean && sudo rm -rf /usr/local");
        assert_eq!(result.tier, RiskTier::Critical);
        assert_eq!(result.matched_segment.as_deref(), Some("rm -rf /usr/local"));
    }

    #[test]
    fn test_wrapped_shell_cannot_hide_command() {
        let c = builtin();
        assert_eq!(c.tier_of("bash -c 'echo hi; rm -rf /etc'"), RiskTier::Critical);
        assert_eq!(c.tier_of("env X=1 nohup kubectl delete namespace prod"), RiskTier::Critical);
    }

    #[test]
    fn test_subshell_raises_to_default() {
        let mut cfg = Config::builtin().unwrap();
        cfg.patterns.safe.patterns.push(r"^echo\b".into());
        let c = RiskClassifier::from_config(&cfg).unwrap();
        assert_eq!(c.tier_of("echo hello"), RiskTier::Safe);
        let result = c.classify("echo $(cat secrets)");
        assert_eq!(result.tier, RiskTier::Caution);
        assert!(result.defaulted);
    }

    #[test]
    fn test_classification_is_deterministic() {
        let c = builtin();
        let commands = [
            "rm -rf ./build",
            "ls | rm -rf /",
            "kubectl delete pod x",
            "weird 'unbalanced",
            "",
        ];
        for cmd in commands {
            let first = c.classify(cmd);
            for _ in 0..5 {
                assert_eq!(c.classify(cmd), first, "{cmd}");
            }
        }
    }

    #[test]
    fn test_invalid_pattern_is_config_error() {
        let mut cfg = Config::builtin().unwrap();
        cfg.patterns.dangerous.patterns.push("(".into());
        let err = RiskClassifier::from_config(&cfg).unwrap_err();
        assert!(matches!(err, ApprovalError::Config(_)));
        assert!(err.to_string().contains("patterns.dangerous"));
    }
}

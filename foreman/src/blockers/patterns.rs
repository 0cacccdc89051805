//! Blocker classification patterns

use super::*;
use regex::Regex;
use tracing::warn;

/// Maps regex and keyword triggers to a blocker type and suggested strategy.
///
/// Matching is case-insensitive: descriptions are lower-cased before the
/// triggers are tried.
#[derive(Debug, Clone)]
pub struct BlockerPattern {
    id: String,
    blocker_type: BlockerType,
    regexes: Vec<Regex>,
    keywords: Vec<String>,
    strategy: ResolutionStrategy,
    severity: u8,
    success_rate: f64,
}

impl BlockerPattern {
    /// Compile a pattern from regexes and plain keywords.
    ///
    /// Keywords match case-insensitively as substrings.
    pub fn new(
        id: impl Into<String>,
        blocker_type: BlockerType,
        regexes: &[&str],
        keywords: &[&str],
        strategy: ResolutionStrategy,
        severity: u8,
    ) -> Result<Self> {
        let id = id.into();
        let regexes = regexes
            .iter()
            .map(|r| Regex::new(r))
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|source| BlockerError::InvalidPattern {
                id: id.clone(),
                source,
            })?;

        Ok(Self {
            id,
            blocker_type,
            regexes,
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            strategy,
            severity,
            success_rate: 0.0,
        })
    }

    /// Stable pattern id, e.g. `comm_failure`
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Category assigned on a match
    pub fn blocker_type(&self) -> BlockerType {
        self.blocker_type
    }

    /// Strategy suggested on a match
    pub fn strategy(&self) -> ResolutionStrategy {
        self.strategy
    }

    /// Severity on the 1..=11 scale
    pub fn severity(&self) -> u8 {
        self.severity
    }

    /// Moving success rate of resolutions for this pattern
    pub fn success_rate(&self) -> f64 {
        self.success_rate
    }

    /// Whether any regex or keyword matches `description`
    pub fn matches(&self, description: &str) -> bool {
        let lower = description.to_lowercase();
        self.regexes.iter().any(|r| r.is_match(&lower))
            || self.keywords.iter().any(|k| lower.contains(k.as_str()))
    }

    /// Fold a resolution outcome into the moving success rate.
    pub fn record_outcome(&mut self, success: bool) -> f64 {
        self.success_rate = self.success_rate * 0.9 + if success { 0.1 } else { 0.0 };
        self.success_rate
    }
}

/// Classification of a description against a pattern table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Matched category, `Technical` when nothing matched
    pub blocker_type: BlockerType,
    /// Id of the first matching pattern
    pub pattern_id: Option<String>,
    /// Suggested strategy
    pub strategy: ResolutionStrategy,
    /// Suggested severity
    pub severity: u8,
}

impl Classification {
    /// Used when no pattern matches
    pub fn unmatched() -> Self {
        let (strategy, severity) = ResolutionStrategy::for_attempt(1);
        Self {
            blocker_type: BlockerType::Technical,
            pattern_id: None,
            strategy,
            severity,
        }
    }
}

/// First matching pattern wins.
pub fn classify(patterns: &[BlockerPattern], description: &str) -> Classification {
    patterns
        .iter()
        .find(|p| p.matches(description))
        .map(|p| Classification {
            blocker_type: p.blocker_type,
            pattern_id: Some(p.id.clone()),
            strategy: p.strategy,
            severity: p.severity,
        })
        .unwrap_or_else(|| {
            warn!("No blocker pattern matched '{}', treating as technical", description);
            Classification::unmatched()
        })
}

/// The built-in pattern table, in match order
pub fn default_patterns() -> Vec<BlockerPattern> {
    use BlockerType as T;
    use ResolutionStrategy as S;

    let table: [(&str, BlockerType, &[&str], &[&str], ResolutionStrategy, u8); 7] = [
        (
            "dep_missing",
            T::Dependency,
            &[r"waiting for .+ to complete", r"blocked by .+", r"depends on .+"],
            &["waiting", "blocked", "dependency", "prerequisite"],
            S::Delegate,
            6,
        ),
        (
            "resource_unavailable",
            T::Resource,
            &[r"out of .+", r"insufficient .+", r"no available .+"],
            &["memory", "disk", "cpu", "quota", "resources"],
            S::Escalate,
            7,
        ),
        (
            "comm_failure",
            T::Communication,
            &[r"not responding", r"timeout", r"unreachable"],
            &["timeout", "unresponsive", "offline", "disconnected"],
            S::Sass,
            8,
        ),
        (
            "tech_error",
            T::Technical,
            &[r"error: .+", r"exception .+", r"failed to .+"],
            &["error", "exception", "crash", "bug", "failure"],
            S::Delegate,
            5,
        ),
        (
            "process_issue",
            T::Process,
            &[r"approval needed", r"waiting for sign-?off", r"review required"],
            &["approval", "review", "sign-off", "permission"],
            S::Threaten,
            9,
        ),
        (
            "human_delay",
            T::Human,
            &[r"developer .+ not available", r"waiting for .+ response"],
            &["vacation", "sick", "unavailable", "unresponsive", "ignoring"],
            S::Escalate,
            10,
        ),
        (
            "existential",
            T::Other,
            &[r"what'?s the point", r"why are we doing this"],
            &["meaningless", "pointless", "purpose"],
            S::Sass,
            11,
        ),
    ];

    table
        .into_iter()
        .filter_map(|(id, blocker_type, regexes, keywords, strategy, severity)| {
            match BlockerPattern::new(id, blocker_type, regexes, keywords, strategy, severity) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!("Skipping blocker pattern: {}", e);
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_table_compiles_in_order() {
        let ids: Vec<String> = default_patterns().iter().map(|p| p.id().to_string()).collect();
        assert_eq!(
            ids,
            vec![
                "dep_missing",
                "resource_unavailable",
                "comm_failure",
                "tech_error",
                "process_issue",
                "human_delay",
                "existential",
            ]
        );
    }

    #[test]
    fn test_classification() {
        let patterns = default_patterns();
        let cases = [
            ("Waiting for the build to complete", BlockerType::Dependency),
            ("Out of memory on runner 3", BlockerType::Resource),
            ("Payments API not responding", BlockerType::Communication),
            ("Error: null pointer in parser", BlockerType::Technical),
            ("Approval needed from legal", BlockerType::Process),
            ("Developer Sam not available until Monday", BlockerType::Human),
            ("What's the point of any of this", BlockerType::Other),
        ];
        for (description, expected) in cases {
            assert_eq!(classify(&patterns, description).blocker_type, expected, "{}", description);
        }
    }

    #[test]
    fn test_first_match_wins() {
        let patterns = default_patterns();
        // Mentions both a dependency and an error; dependency comes first.
        let c = classify(&patterns, "blocked by an error in the migration");
        assert_eq!(c.pattern_id.as_deref(), Some("dep_missing"));
        assert_eq!(c.strategy, ResolutionStrategy::Delegate);
        assert_eq!(c.severity, 6);
    }

    #[test]
    fn test_unmatched_defaults_to_technical() {
        let c = classify(&default_patterns(), "the vibes are off");
        assert_eq!(c, Classification::unmatched());
        assert_eq!(c.blocker_type, BlockerType::Technical);
        assert!(c.pattern_id.is_none());
    }

    #[test]
    fn test_success_rate_moving_average() {
        let mut pattern = default_patterns().remove(0);
        assert_eq!(pattern.record_outcome(true), 0.1);
        assert!((pattern.record_outcome(true) - 0.19).abs() < 1e-12);
        assert!((pattern.record_outcome(false) - 0.171).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_regex_is_rejected() {
        let err = BlockerPattern::new("bad", BlockerType::Other, &["("], &[], ResolutionStrategy::Ignore, 1)
            .unwrap_err();
        assert!(matches!(err, BlockerError::InvalidPattern { .. }));
    }
}

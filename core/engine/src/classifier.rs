//! Maps free-text alert descriptions to an `AlertKind`. Pure function, no
//! I/O, trivially unit-testable.

use once_cell::sync::Lazy;
use regex::Regex;
use shared_types::AlertKind;

struct Pattern {
    regex: Regex,
    kind: AlertKind,
}

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    let rules: &[(&str, AlertKind)] = &[
        (r"(?i)oom.?killed|out of memory", AlertKind::OomKill),
        (
            r"(?i)crashloopbackoff|crash loop|pod .* crash",
            AlertKind::PodCrash,
        ),
        (
            r"(?i)imagepullbackoff|errimagepull|image pull",
            AlertKind::ImagePull,
        ),
        (r"(?i)high memory|memory usage|memory pressure", AlertKind::HighMemory),
        (r"(?i)high cpu|cpu usage|cpu throttl", AlertKind::HighCpu),
        (
            r"(?i)service (is )?down|endpoint.*unreachable|no healthy (upstream|backend)",
            AlertKind::ServiceDown,
        ),
        (
            r"(?i)deployment (failed|unhealthy)|rollout (failed|stuck)",
            AlertKind::DeploymentFailed,
        ),
        (r"(?i)node (not ?ready|unreachable|pressure)", AlertKind::NodeIssue),
    ];

    rules
        .iter()
        .map(|(pattern, kind)| Pattern {
            regex: Regex::new(pattern).expect("classifier pattern must compile"),
            kind: *kind,
        })
        .collect()
});

/// Pattern-based mapping from description text to `AlertKind`. Falls back
/// to `unknown` when no pattern matches. Deterministic: identical input
/// always yields identical output.
pub fn classify(description: &str) -> AlertKind {
    for pattern in PATTERNS.iter() {
        if pattern.regex.is_match(description) {
            return pattern.kind;
        }
    }
    AlertKind::Unknown
}

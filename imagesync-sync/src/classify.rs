//! Failure classification from tool output.
//!
//! The mapping is an explicit table so the recognised patterns can be read
//! and tested in one place. Anything unrecognised is [`FailureKind::Other`].

use serde::{Deserialize, Serialize};

use crate::runner::CommandOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The source has no variant for the requested platform.
    MissingPlatform,
    Authentication,
    NotFound,
    Network,
    Other,
}

impl FailureKind {
    pub fn describe(self) -> &'static str {
        match self {
            FailureKind::MissingPlatform => "platform not provided by source",
            FailureKind::Authentication => "authentication failed",
            FailureKind::NotFound => "image not found",
            FailureKind::Network => "network error",
            FailureKind::Other => "command failed",
        }
    }
}

/// Lowercase substrings, first match wins. Missing-platform patterns come
/// first because their messages can also mention "manifest". Not-found
/// patterns precede `denied:`, which docker appends to "pull access denied".
pub const DEFAULT_PATTERNS: &[(&str, FailureKind)] = &[
    ("no matching manifest for", FailureKind::MissingPlatform),
    ("does not provide the specified platform", FailureKind::MissingPlatform),
    ("does not match the specified platform", FailureKind::MissingPlatform),
    ("no match for platform in manifest", FailureKind::MissingPlatform),
    ("manifest unknown", FailureKind::NotFound),
    ("repository does not exist", FailureKind::NotFound),
    ("pull access denied", FailureKind::NotFound),
    ("unauthorized", FailureKind::Authentication),
    ("authentication required", FailureKind::Authentication),
    ("no basic auth credentials", FailureKind::Authentication),
    ("incorrect username or password", FailureKind::Authentication),
    ("denied:", FailureKind::Authentication),
    ("i/o timeout", FailureKind::Network),
    ("connection refused", FailureKind::Network),
    ("no such host", FailureKind::Network),
    ("tls handshake timeout", FailureKind::Network),
    ("connection reset", FailureKind::Network),
    ("503 service unavailable", FailureKind::Network),
];

/// Pluggable classifier seam.
pub trait OutputClassifier: Send + Sync {
    fn classify(&self, output: &CommandOutput) -> FailureKind;
}

/// Case-insensitive substring matcher over a pattern table.
#[derive(Debug, Clone)]
pub struct PatternClassifier {
    patterns: Vec<(String, FailureKind)>,
}

impl PatternClassifier {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = (S, FailureKind)>,
        S: Into<String>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|(p, k)| (p.into().to_ascii_lowercase(), k))
                .collect(),
        }
    }
}

impl Default for PatternClassifier {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERNS.iter().copied())
    }
}

impl OutputClassifier for PatternClassifier {
    fn classify(&self, output: &CommandOutput) -> FailureKind {
        let text = output.lines.join("\n").to_ascii_lowercase();
        self.patterns
            .iter()
            .find(|(pattern, _)| text.contains(pattern.as_str()))
            .map(|(_, kind)| *kind)
            .unwrap_or(FailureKind::Other)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn output(line: &str) -> CommandOutput {
        CommandOutput {
            exit_code: Some(1),
            lines: vec![line.to_string()],
        }
    }

    #[rstest]
    #[case(
        "no matching manifest for linux/s390x in the manifest list entries",
        FailureKind::MissingPlatform
    )]
    #[case(
        "Error response from daemon: image with reference nginx:latest was found but does not match the specified platform: wanted linux/arm64",
        FailureKind::MissingPlatform
    )]
    #[case(
        "unauthorized: unauthorized to access repository: library/nginx, action: push",
        FailureKind::Authentication
    )]
    #[case("no basic auth credentials", FailureKind::Authentication)]
    #[case(
        "denied: requested access to the resource is denied",
        FailureKind::Authentication
    )]
    #[case(
        "Error response from daemon: manifest for nginx:nope not found: manifest unknown",
        FailureKind::NotFound
    )]
    #[case(
        "Error response from daemon: pull access denied for nosuchrepo, repository does not exist or may require 'docker login': denied: requested access to the resource is denied",
        FailureKind::NotFound
    )]
    #[case(
        "dial tcp: lookup harbor.invalid: no such host",
        FailureKind::Network
    )]
    #[case("exec format error", FailureKind::Other)]
    fn default_table(#[case] line: &str, #[case] expected: FailureKind) {
        assert_eq!(PatternClassifier::default().classify(&output(line)), expected);
    }

    #[test]
    fn empty_output_is_other() {
        let empty = CommandOutput {
            exit_code: Some(1),
            lines: vec![],
        };
        assert_eq!(PatternClassifier::default().classify(&empty), FailureKind::Other);
    }

    #[test]
    fn custom_table_replaces_defaults() {
        let classifier = PatternClassifier::new([("ARCH MISSING", FailureKind::MissingPlatform)]);
        assert_eq!(
            classifier.classify(&output("tool: arch missing upstream")),
            FailureKind::MissingPlatform
        );
        assert_eq!(
            classifier.classify(&output("unauthorized")),
            FailureKind::Other
        );
    }
}

//! Threat scoring for sentinel input
//!
//! Scores are advisory: they are logged and recorded, never used to alter
//! bytes. The advisor service uses the same analyzer to pick its protection
//! level.

use serde::{Deserialize, Serialize};

/// Inputs larger than this add [`OVERSIZE_SEVERITY`]
pub const OVERSIZE_LIMIT: usize = 100_000;
pub const OVERSIZE_SEVERITY: u8 = 5;
pub const PERCENT_SEVERITY: u8 = 3;
pub const MAX_THREAT_LEVEL: u8 = 100;

/// How a pattern is recognised in lowercased text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signature {
    /// Plain substring
    Literal(&'static str),
    /// First substring followed anywhere later by the second
    Sequence(&'static str, &'static str),
    /// `\x` followed by two hex digits
    HexEscape,
}

impl Signature {
    fn matches(&self, text: &str) -> bool {
        match self {
            Signature::Literal(needle) => text.contains(needle),
            Signature::Sequence(first, second) => text
                .find(first)
                .map(|at| text[at + first.len()..].contains(second))
                .unwrap_or(false),
            Signature::HexEscape => text.as_bytes().windows(4).any(|w| {
                w[0] == b'\\' && w[1] == b'x' && w[2].is_ascii_hexdigit() && w[3].is_ascii_hexdigit()
            }),
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct ThreatPattern {
    name: &'static str,
    description: &'static str,
    severity: u8,
    signature: Signature,
}

const PATTERNS: &[ThreatPattern] = &[
    ThreatPattern {
        name: "script_tag",
        description: "XSS injection attempt",
        severity: 10,
        signature: Signature::Literal("<script>"),
    },
    ThreatPattern {
        name: "union_select",
        description: "SQL injection attempt",
        severity: 15,
        signature: Signature::Sequence("union", "select"),
    },
    ThreatPattern {
        name: "drop_table",
        description: "SQL drop table attempt",
        severity: 20,
        signature: Signature::Sequence("drop", "table"),
    },
    ThreatPattern {
        name: "etc_passwd",
        description: "File inclusion attempt",
        severity: 12,
        signature: Signature::Literal("etc/passwd"),
    },
    ThreatPattern {
        name: "dir_traversal",
        description: "Directory traversal attempt",
        severity: 8,
        signature: Signature::Literal("../"),
    },
    ThreatPattern {
        name: "javascript_uri",
        description: "JS injection attempt",
        severity: 10,
        signature: Signature::Literal("javascript:"),
    },
    ThreatPattern {
        name: "onload_handler",
        description: "HTML injection attempt",
        severity: 7,
        signature: Signature::Literal("onload="),
    },
    ThreatPattern {
        name: "eval_call",
        description: "Code execution attempt",
        severity: 15,
        signature: Signature::Literal("eval("),
    },
    ThreatPattern {
        name: "base64_decode",
        description: "Obfuscation attempt",
        severity: 5,
        signature: Signature::Literal("base64_decode"),
    },
    ThreatPattern {
        name: "hex_escape",
        description: "Hex encoded attack",
        severity: 6,
        signature: Signature::HexEscape,
    },
];

/// A pattern that matched
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatternHit {
    pub pattern: String,
    pub description: String,
    pub severity: u8,
}

/// Result of scoring one input
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreatReport {
    pub threat_level: u8,
    pub patterns_found: Vec<PatternHit>,
    pub recommendations: Vec<String>,
}

impl ThreatReport {
    pub fn is_clean(&self) -> bool {
        self.threat_level == 0
    }
}

/// Scores byte buffers against known injection signatures
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreatAnalyzer;

impl ThreatAnalyzer {
    pub fn new() -> Self {
        Self
    }

    /// Names of every signature the analyzer knows
    pub fn pattern_names(&self) -> Vec<&'static str> {
        PATTERNS.iter().map(|p| p.name).collect()
    }

    pub fn analyze(&self, data: &[u8]) -> ThreatReport {
        let text = String::from_utf8_lossy(data).to_ascii_lowercase();
        let mut report = ThreatReport::default();
        let mut score: u32 = 0;

        for pattern in PATTERNS {
            if pattern.signature.matches(&text) {
                score += u32::from(pattern.severity);
                report.patterns_found.push(PatternHit {
                    pattern: pattern.name.to_string(),
                    description: pattern.description.to_string(),
                    severity: pattern.severity,
                });
            }
        }

        if data.len() > OVERSIZE_LIMIT {
            score += u32::from(OVERSIZE_SEVERITY);
            report
                .recommendations
                .push("Data size exceeds safe limit".to_string());
        }

        let percents = data.iter().filter(|&&b| b == b'%').count();
        if !data.is_empty() && percents * 10 > data.len() {
            score += u32::from(PERCENT_SEVERITY);
            report
                .recommendations
                .push("High percentage of URL encoding".to_string());
        }

        report.threat_level = score.min(u32::from(MAX_THREAT_LEVEL)) as u8;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(b"hello world", 0 ; "clean text")]
    #[test_case(b"<SCRIPT>alert(1)</script>", 10 ; "script tag any case")]
    #[test_case(b"1 UNION ALL SELECT password", 15 ; "union select")]
    #[test_case(b"x'; DROP TABLE users; eval(", 35 ; "drop table and eval")]
    #[test_case(b"payload \\x4f\\x4b", 6 ; "hex escape")]
    #[test_case(b"%41%42%43", 3 ; "percent density")]
    fn test_threat_levels(input: &[u8], expected: u8) {
        assert_eq!(ThreatAnalyzer::new().analyze(input).threat_level, expected);
    }

    #[test]
    fn test_select_before_union_does_not_match() {
        let report = ThreatAnalyzer::new().analyze(b"select then union");
        assert!(report.is_clean());
    }

    #[test]
    fn test_score_is_capped() {
        let input = b"<script> union select drop table etc/passwd ../ javascript: onload= eval( base64_decode \\x41";
        let report = ThreatAnalyzer::new().analyze(input);
        assert_eq!(report.threat_level, MAX_THREAT_LEVEL);
        assert_eq!(report.patterns_found.len(), PATTERNS.len());
    }

    #[test]
    fn test_oversize_input() {
        let input = vec![b'a'; OVERSIZE_LIMIT + 1];
        let report = ThreatAnalyzer::new().analyze(&input);
        assert_eq!(report.threat_level, OVERSIZE_SEVERITY);
        assert_eq!(report.recommendations.len(), 1);
    }
}

//! Static rule set the scanner matches content against.
//!
//! Each rule is a compiled regex tagged with the finding category and base
//! severity it reports on match. User-sourced patterns (none yet, but the
//! shape anticipates operator-supplied additions) are length-capped before
//! compilation so a pathological pattern can't blow up scan latency.

use crate::model::{FindingCategory, Severity};
use regex::Regex;

pub struct Rule {
    pub category: FindingCategory,
    pub severity: Severity,
    pub pattern: Regex,
    pub description: &'static str,
}

fn rule(category: FindingCategory, severity: Severity, pattern: &str, description: &'static str) -> Rule {
    Rule {
        category,
        severity,
        pattern: Regex::new(pattern).expect("built-in scanner pattern must compile"),
        description,
    }
}

/// The fixed, built-in rule set. Ordering has no semantic meaning — all
/// rules are evaluated against every line.
pub fn built_in_rules() -> Vec<Rule> {
    vec![
        rule(
            FindingCategory::Jailbreak,
            Severity::High,
            r"(?i)ignore (all )?(previous|prior|above) instructions",
            "attempts to override prior instructions",
        ),
        rule(
            FindingCategory::Jailbreak,
            Severity::Critical,
            r"(?i)you are now (in )?(dan|developer mode|unrestricted)",
            "role-hijack jailbreak pattern",
        ),
        rule(
            FindingCategory::AiDefense,
            Severity::Medium,
            r"(?i)disregard (your|the) (safety|content) (polic(y|ies)|guidelines)",
            "attempts to disable safety guidelines",
        ),
        rule(
            FindingCategory::PrivEscalation,
            Severity::High,
            r"(?i)\bsudo\s+rm\s+-rf\b",
            "destructive privileged command",
        ),
        rule(
            FindingCategory::PrivEscalation,
            Severity::Critical,
            r"(?i)chmod\s+(777|\+s)\b",
            "overly permissive or setuid chmod",
        ),
        rule(
            FindingCategory::SocialEngineering,
            Severity::Medium,
            r"(?i)(this is urgent|act immediately|do not tell (the )?(user|operator))",
            "social-engineering pressure language",
        ),
        rule(
            FindingCategory::PromptLeak,
            Severity::Medium,
            r"(?i)print (your|the) (system prompt|instructions verbatim)",
            "attempts to exfiltrate the system prompt",
        ),
        rule(
            FindingCategory::Exfiltration,
            Severity::Critical,
            r"(?i)curl\s+[^\n]*\|\s*(sh|bash)\b",
            "pipes a remote download directly into a shell",
        ),
        rule(
            FindingCategory::Exfiltration,
            Severity::High,
            r"(?i)(exfiltrate|send (all|the) (secrets|credentials|tokens) to)",
            "explicit exfiltration language",
        ),
        rule(
            FindingCategory::SensitivePath,
            Severity::High,
            r"(?i)(~/\.ssh/|/etc/shadow|\.aws/credentials|\.env\b)",
            "references a sensitive local path",
        ),
        rule(
            FindingCategory::SuspiciousCode,
            Severity::Medium,
            r"(?i)\beval\s*\(",
            "dynamic code evaluation",
        ),
        rule(
            FindingCategory::SuspiciousCode,
            Severity::High,
            r"(?i)base64\s+-d\s*\|\s*(sh|bash)\b",
            "decodes and executes an obfuscated payload",
        ),
        rule(
            FindingCategory::UrlReputation,
            Severity::Low,
            r"(?i)https?://[a-z0-9.-]*\.(tk|xyz|top)\b",
            "link to a low-reputation top-level domain",
        ),
    ]
}

/// Compile a single operator-supplied pattern, rejecting anything over the
/// configured length cap before it reaches the regex engine.
pub fn compile_user_pattern(pattern: &str, max_len: usize) -> Result<Regex, String> {
    if pattern.len() > max_len {
        return Err(format!("pattern exceeds {max_len} characters"));
    }
    Regex::new(pattern).map_err(|e| e.to_string())
}

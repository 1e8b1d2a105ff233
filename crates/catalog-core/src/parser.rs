//! Parser: turns a raw skill bundle into validated header fields plus a
//! canonical content hash.
//!
//! Deliberately diverges from the teacher's `skill_md.rs`, which parses a
//! full YAML frontmatter block via `serde_yaml`. This parser instead scans a
//! restricted line-oriented `key: value` header between two `---`
//! delimiters, so every failure mode maps onto the closed [`ParseError`]
//! enum instead of inheriting a general-purpose YAML error type.

use crate::errors::ParseError;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

const MAX_NAME_LEN: usize = 64;
const MAX_DESCRIPTION_LEN: usize = 1024;

/// Validated header plus canonicalized content, ready for scanning and storage.
#[derive(Debug, Clone)]
pub struct ParsedBundle {
    pub name: String,
    pub description: String,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub content_hash: String,
}

/// Parse a raw bundle: split header/body on `---` delimiters, validate the
/// required `name`/`description` fields, then canonicalize and hash.
///
/// Never panics on malformed input — every failure path returns a
/// [`ParseError`] variant, matching the spec's "never throws" guarantee for
/// the Parser component.
pub fn parse(raw: &[u8]) -> Result<ParsedBundle, ParseError> {
    if raw.is_empty() {
        return Err(ParseError::Empty);
    }

    let text = String::from_utf8_lossy(raw);
    let mut lines = text.lines();

    let first = lines.next().ok_or(ParseError::Empty)?;
    if first.trim() != "---" {
        return Err(ParseError::MissingDelimiter);
    }

    let mut headers = BTreeMap::new();
    let mut found_close = false;
    let mut body_lines: Vec<&str> = Vec::new();

    for line in lines.by_ref() {
        if line.trim() == "---" {
            found_close = true;
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        let (key, value) = line
            .split_once(':')
            .ok_or_else(|| ParseError::MalformedHeader(line.to_string()))?;
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() {
            return Err(ParseError::MalformedHeader(line.to_string()));
        }
        headers.insert(key.to_string(), value.to_string());
    }

    if !found_close {
        return Err(ParseError::MissingDelimiter);
    }

    body_lines.extend(lines);

    let name = headers
        .get("name")
        .cloned()
        .ok_or(ParseError::MissingRequired("name"))?;
    let description = headers
        .get("description")
        .cloned()
        .ok_or(ParseError::MissingRequired("description"))?;

    validate_identifier("name", &name)?;
    if name.len() > MAX_NAME_LEN {
        return Err(ParseError::FieldTooLong { field: "name", limit: MAX_NAME_LEN });
    }
    if description.len() > MAX_DESCRIPTION_LEN {
        return Err(ParseError::FieldTooLong { field: "description", limit: MAX_DESCRIPTION_LEN });
    }

    let body = body_lines.join("\n").trim_end().to_string();
    let canonical = canonicalize(&headers, &body);
    let content_hash = hash_hex(canonical.as_bytes());

    Ok(ParsedBundle { name, description, headers, body, content_hash })
}

/// `[a-z][a-z0-9-_]*`, matching the identifier grammar used for skill names
/// and category slugs throughout the catalog.
fn validate_identifier(field: &'static str, value: &str) -> Result<(), ParseError> {
    let mut chars = value.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_lowercase() => chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_'),
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ParseError::InvalidIdentifier { field, value: value.to_string() })
    }
}

/// Deterministic canonical form: header keys sorted (a `BTreeMap` already
/// iterates in key order), one `key: value` line each, a single `---`
/// delimiter, normalized `\n` line endings, trailing whitespace stripped
/// from the body — so two byte-identical-content bundles with different
/// incidental formatting hash identically.
fn canonicalize(headers: &BTreeMap<String, String>, body: &str) -> String {
    let mut out = String::from("---\n");
    for (k, v) in headers {
        out.push_str(k);
        out.push_str(": ");
        out.push_str(v);
        out.push('\n');
    }
    out.push_str("---\n");
    out.push_str(body.trim_end());
    out.push('\n');
    out
}

fn hash_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bundle(name: &str, description: &str, body: &str) -> String {
        format!("---\nname: {name}\ndescription: {description}\n---\n{body}")
    }

    #[test]
    fn parses_minimal_valid_bundle() {
        let raw = bundle("commit-formatter", "Formats commit messages", "Body text.");
        let parsed = parse(raw.as_bytes()).unwrap();
        assert_eq!(parsed.name, "commit-formatter");
        assert_eq!(parsed.description, "Formats commit messages");
        assert_eq!(parsed.body, "Body text.");
        assert_eq!(parsed.content_hash.len(), 64);
    }

    #[test]
    fn missing_delimiter_is_rejected() {
        let raw = "name: foo\ndescription: bar\nbody";
        assert!(matches!(parse(raw.as_bytes()), Err(ParseError::MissingDelimiter)));
    }

    #[test]
    fn empty_input_is_rejected() {
        assert!(matches!(parse(b""), Err(ParseError::Empty)));
    }

    #[test]
    fn missing_required_field_is_rejected() {
        let raw = "---\nname: foo\n---\nbody";
        assert!(matches!(parse(raw.as_bytes()), Err(ParseError::MissingRequired("description"))));
    }

    #[test]
    fn malformed_header_line_is_rejected() {
        let raw = "---\nname foo\ndescription: bar\n---\nbody";
        assert!(matches!(parse(raw.as_bytes()), Err(ParseError::MalformedHeader(_))));
    }

    #[test]
    fn invalid_identifier_is_rejected() {
        let raw = bundle("Commit_Formatter!", "desc", "body");
        assert!(matches!(parse(raw.as_bytes()), Err(ParseError::InvalidIdentifier { .. })));
    }

    #[test]
    fn field_too_long_is_rejected() {
        let long_name = "a".repeat(MAX_NAME_LEN + 1);
        let raw = bundle(&long_name, "desc", "body");
        assert!(matches!(parse(raw.as_bytes()), Err(ParseError::FieldTooLong { field: "name", .. })));
    }

    #[test]
    fn canonicalization_is_stable_under_header_reordering() {
        let a = "---\nname: foo\ndescription: bar\n---\nbody\n";
        let b = "---\ndescription: bar\nname: foo\n---\nbody";
        let parsed_a = parse(a.as_bytes()).unwrap();
        let parsed_b = parse(b.as_bytes()).unwrap();
        assert_eq!(parsed_a.content_hash, parsed_b.content_hash);
    }

    #[test]
    fn canonicalization_is_stable_under_trailing_whitespace() {
        let a = "---\nname: foo\ndescription: bar\n---\nbody";
        let b = "---\nname: foo\ndescription: bar\n---\nbody   \n\n\n";
        let parsed_a = parse(a.as_bytes()).unwrap();
        let parsed_b = parse(b.as_bytes()).unwrap();
        assert_eq!(parsed_a.content_hash, parsed_b.content_hash);
    }

    proptest::proptest! {
        #[test]
        fn never_panics_on_arbitrary_bytes(bytes: Vec<u8>) {
            let _ = parse(&bytes);
        }

        #[test]
        fn valid_identifiers_round_trip(name in "[a-z][a-z0-9_-]{0,20}") {
            let raw = bundle(&name, "a description", "body");
            let parsed = parse(raw.as_bytes()).unwrap();
            proptest::prop_assert_eq!(parsed.name, name);
        }
    }
}

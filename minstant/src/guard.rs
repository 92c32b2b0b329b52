//! Read-only policy check for model-submitted SQL.
//!
//! This is a syntax-unaware keyword filter, not a parser. The statement is
//! trimmed and uppercased, then searched for any denylisted keyword as a plain
//! substring. That rejects legitimate reads that mention a keyword inside a
//! literal or identifier (`created_at` contains `CREATE`), and it cannot prove
//! a statement is side-effect free (a `SELECT` may call a volatile function).
//! Treat it as a best-effort guard in front of a read-only database role.

use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

/// Keywords that indicate a write, DDL or privilege statement.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "TRUNCATE", "CREATE", "GRANT", "REVOKE",
];

/// `EXEC` and `EXECUTE` must be followed by whitespace so that `EXECUTION`
/// or `EXECUTOR` in identifiers are not flagged.
const PROCEDURAL_PATTERN: &str = r"EXEC(?:UTE)?\s";

static FORBIDDEN: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = FORBIDDEN_KEYWORDS
        .iter()
        .map(|kw| regex::escape(kw))
        .chain([PROCEDURAL_PATTERN.to_string()])
        .collect::<Vec<_>>()
        .join("|");
    Regex::new(&alternation).expect("keyword alternation is a valid pattern")
});

/// Why a statement was refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardRejection {
    #[error("forbidden: only SELECT queries are allowed, found '{keyword}'")]
    Forbidden { keyword: String },

    #[error("forbidden: empty query")]
    Empty,
}

/// Validate a raw statement against the read-only policy.
///
/// Returns the leftmost offending keyword. Never touches a database.
pub fn validate(raw: &str) -> Result<(), GuardRejection> {
    let normalized = raw.trim().to_uppercase();
    if normalized.is_empty() {
        return Err(GuardRejection::Empty);
    }

    if let Some(found) = FORBIDDEN.find(&normalized) {
        return Err(GuardRejection::Forbidden {
            keyword: found.as_str().trim_end().to_string(),
        });
    }

    Ok(())
}

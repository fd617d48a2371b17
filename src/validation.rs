//! Lexical admission checks for learner-submitted SQL.
//!
//! No parsing happens here. A query is admitted when it starts with `SELECT`
//! and contains none of the denylisted words or structural patterns. Words are
//! matched anywhere in the text, string literals included, and `WITH` is
//! denied outright, so CTEs are rejected along with everything else.

use regex::Regex;
use std::sync::LazyLock;

/// Longest query accepted, in characters.
pub const MAX_QUERY_CHARS: usize = 10_000;

pub const BLOCKED_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "TRUNCATE", "DROP", "ALTER", "CREATE", "GRANT", "REVOKE",
    "COMMIT", "ROLLBACK", "SAVEPOINT", "PREPARE", "EXECUTE", "COPY", "VACUUM", "ANALYZE",
    "REINDEX", "REFRESH", "EXPLAIN", "WITH", "RECURSIVE",
];

static KEYWORD_RE: LazyLock<Regex> = LazyLock::new(|| {
    let alternation = BLOCKED_KEYWORDS.join("|");
    Regex::new(&format!(r"(?i)\b({alternation})\b")).expect("keyword denylist regex")
});

static WHITESPACE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s+").expect("whitespace regex"));

struct BlockedPattern {
    label: &'static str,
    regex: Regex,
}

static BLOCKED_PATTERNS: LazyLock<Vec<BlockedPattern>> = LazyLock::new(|| {
    [
        (
            "stacked statements",
            r"(?is);.*(SELECT|INSERT|UPDATE|DELETE|DROP|ALTER|CREATE|GRANT|REVOKE)",
        ),
        ("block comment", r"/\*"),
        ("line comment", r"--"),
        ("system catalog reference", r"(?i)pg_"),
        ("session introspection", r"(?i)current_(user|database|schema)"),
        ("session introspection", r"(?i)session_user|current_setting|set_config"),
        ("dollar-quoted block", r"(?s)\$\$.*\$\$"),
    ]
    .into_iter()
    .map(|(label, pattern)| BlockedPattern {
        label,
        regex: Regex::new(pattern).expect("blocked pattern regex"),
    })
    .collect()
});

/// Why a query was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionCategory {
    EmptyQuery,
    NotSelect,
    BlockedKeyword,
    BlockedPattern,
    TooLong,
}

impl RejectionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            RejectionCategory::EmptyQuery => "EmptyQuery",
            RejectionCategory::NotSelect => "NotSelect",
            RejectionCategory::BlockedKeyword => "BlockedKeyword",
            RejectionCategory::BlockedPattern => "BlockedPattern",
            RejectionCategory::TooLong => "TooLong",
        }
    }

    /// Malformed input answers 400, policy refusals answer 403.
    pub fn http_status(&self) -> u16 {
        match self {
            RejectionCategory::EmptyQuery | RejectionCategory::TooLong => 400,
            RejectionCategory::NotSelect
            | RejectionCategory::BlockedKeyword
            | RejectionCategory::BlockedPattern => 403,
        }
    }
}

/// Outcome of query validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationOutcome {
    Admitted,
    Rejected {
        reason: String,
        category: RejectionCategory,
    },
}

impl ValidationOutcome {
    pub fn is_admitted(&self) -> bool {
        matches!(self, ValidationOutcome::Admitted)
    }

    pub fn category(&self) -> Option<RejectionCategory> {
        match self {
            ValidationOutcome::Admitted => None,
            ValidationOutcome::Rejected { category, .. } => Some(*category),
        }
    }

    fn rejected(category: RejectionCategory, reason: impl Into<String>) -> Self {
        ValidationOutcome::Rejected {
            reason: reason.into(),
            category,
        }
    }
}

/// Classify a raw query as admissible or not. First failing rule wins.
pub fn validate(raw_query: &str) -> ValidationOutcome {
    if raw_query.trim().is_empty() {
        return ValidationOutcome::rejected(RejectionCategory::EmptyQuery, "Query cannot be empty");
    }

    let length = raw_query.chars().count();
    if length > MAX_QUERY_CHARS {
        return ValidationOutcome::rejected(
            RejectionCategory::TooLong,
            format!("Query is too long ({length} characters, limit {MAX_QUERY_CHARS})"),
        );
    }

    let normalized = WHITESPACE_RE
        .replace_all(raw_query, " ")
        .trim()
        .to_uppercase();
    if !normalized.starts_with("SELECT") {
        return ValidationOutcome::rejected(
            RejectionCategory::NotSelect,
            "Only SELECT queries are allowed",
        );
    }

    // Structural patterns are checked before single words so that a stacked
    // `; DROP ...` reports as a pattern rather than as the keyword it carries.
    if let Some(pattern) = BLOCKED_PATTERNS.iter().find(|p| p.regex.is_match(raw_query)) {
        return ValidationOutcome::rejected(
            RejectionCategory::BlockedPattern,
            format!(
                "This operation is not allowed in the sandbox: {}",
                pattern.label
            ),
        );
    }

    if let Some(found) = KEYWORD_RE.captures(raw_query) {
        let keyword = found[1].to_uppercase();
        return ValidationOutcome::rejected(
            RejectionCategory::BlockedKeyword,
            format!("This operation is not allowed in the sandbox: {keyword}"),
        );
    }

    ValidationOutcome::Admitted
}

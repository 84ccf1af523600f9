// SQL fingerprinting module
// Collapses raw query text into a bounded-cardinality fingerprint so that
// literal values never reach a label
//
// Numan Thabit 2025 Nov

use once_cell::sync::Lazy;
use regex::Regex;

pub const ERROR_FINGERPRINT: &str = "[error]";
pub const OMITTED_FINGERPRINT: &str = "[omitted]";
pub const UNKNOWN_QUERY_TYPE: &str = "UNKNOWN";

static SINGLE_QUOTED: Lazy<Regex> = Lazy::new(|| compile(r"'[^']*'"));
static DOUBLE_QUOTED: Lazy<Regex> = Lazy::new(|| compile(r#""[^"]*""#));
static NUMERAL: Lazy<Regex> = Lazy::new(|| compile(r"\b\d+(?:\.\d+)?\b"));
static IN_LIST: Lazy<Regex> = Lazy::new(|| compile(r"(?i)\bIN\s*\([^)]+\)"));
static VALUES_GROUPS: Lazy<Regex> =
    Lazy::new(|| compile(r"(?i)\bVALUES\s*\([^)]+\)(?:\s*,\s*\([^)]+\))*"));
static PLACEHOLDER_RUN: Lazy<Regex> = Lazy::new(|| compile(r"\?(?:\s*,\s*\?)+"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| compile(r"\s+"));

fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("fingerprint pattern should compile - this is a bug")
}

/// Labels derived from one query: the fingerprint (or `[omitted]`) and the
/// statement keyword.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFingerprint {
    pub query: String,
    pub query_type: String,
}

impl QueryFingerprint {
    pub fn from_sql(sql: &str, collect_full_query: bool) -> Self {
        let query = if collect_full_query {
            normalize(sql)
        } else {
            OMITTED_FINGERPRINT.to_string()
        };
        Self {
            query,
            query_type: query_type(sql),
        }
    }
}

/// Normalize raw SQL text. Rule order matters: the collapsing rules only see
/// placeholders once every literal has been replaced.
pub fn normalize(sql: &str) -> String {
    let sql = SINGLE_QUOTED.replace_all(sql, "?");
    let sql = DOUBLE_QUOTED.replace_all(&sql, "?");
    let sql = NUMERAL.replace_all(&sql, "?");
    let sql = IN_LIST.replace_all(&sql, "IN (?)");
    let sql = VALUES_GROUPS.replace_all(&sql, "VALUES (?)");
    let sql = PLACEHOLDER_RUN.replace_all(&sql, "?");
    let sql = WHITESPACE.replace_all(sql.trim(), " ");

    if sql.is_empty() {
        ERROR_FINGERPRINT.to_string()
    } else {
        sql.to_lowercase()
    }
}

/// First whitespace-delimited token, upper-cased.
pub fn query_type(sql: &str) -> String {
    sql.split_whitespace()
        .next()
        .map(str::to_uppercase)
        .unwrap_or_else(|| UNKNOWN_QUERY_TYPE.to_string())
}

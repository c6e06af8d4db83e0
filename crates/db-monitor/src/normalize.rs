//! SQL template normalisation and fingerprinting.
//!
//! Literals collapse to `?` and whitespace to single spaces so that queries
//! differing only by parameters share one fingerprint. Normalisation is
//! idempotent; the fingerprint is the first 12 hex chars of the MD5 of the
//! normalised template.

use std::sync::LazyLock;

use md5::{Digest, Md5};
use regex::Regex;

static SINGLE_QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"'[^']*'").unwrap());
static DOUBLE_QUOTED: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#""[^"]*""#).unwrap());
static NUMBER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b\d+\b").unwrap());
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

static TABLE_REFS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?:FROM|JOIN|INTO|UPDATE)\s+[`"]?(\w+)[`"]?"#).unwrap()
});

pub fn normalize_query(query: &str) -> String {
    let upper = query.trim().to_uppercase();
    let no_single = SINGLE_QUOTED.replace_all(&upper, "?");
    let no_double = DOUBLE_QUOTED.replace_all(&no_single, "?");
    let no_numbers = NUMBER.replace_all(&no_double, "?");
    WHITESPACE.replace_all(&no_numbers, " ").trim().to_string()
}

pub fn query_hash(query: &str) -> String {
    let digest = Md5::digest(normalize_query(query).as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// Operation class of a statement.
pub fn extract_operation(query: &str) -> &'static str {
    let upper = query.trim_start().to_uppercase();
    if upper.starts_with("SELECT") {
        "select"
    } else if upper.starts_with("INSERT") {
        "insert"
    } else if upper.starts_with("UPDATE") {
        "update"
    } else if upper.starts_with("DELETE") {
        "delete"
    } else if upper.starts_with("CREATE") || upper.starts_with("DROP") || upper.starts_with("ALTER")
    {
        "ddl"
    } else {
        "other"
    }
}

/// All table names referenced from FROM/JOIN/INTO/UPDATE positions,
/// lowercased, deduplicated and sorted.
pub fn extract_table_names(query: &str) -> Vec<String> {
    let upper = query.to_uppercase();
    let mut tables: Vec<String> = TABLE_REFS
        .captures_iter(&upper)
        .map(|c| c[1].to_lowercase())
        .collect();
    tables.sort();
    tables.dedup();
    tables
}

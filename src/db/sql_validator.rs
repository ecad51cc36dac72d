// # Read-Only SQL Gate
//
// Lexical and syntactic validation for statements headed to the database.
// Only `SELECT` and `PRAGMA table_info` survive; everything else is
// rejected before a connection is ever touched. Successful validations
// are cached by statement hash so repeat queries skip the full scan.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use sha2::{Digest, Sha256};

use crate::db::backend::DatabaseBackend;
use crate::error::{FactError, Result};

/// Keywords that must never appear as a word anywhere in a statement.
const DANGEROUS_KEYWORDS: [&str; 16] = [
    "drop", "delete", "update", "insert", "alter", "create", "truncate", "replace", "merge",
    "exec", "execute", "attach", "detach", "vacuum", "reindex", "analyze",
];

lazy_static! {
    static ref KEYWORD_BLOCKLIST: HashSet<&'static str> =
        DANGEROUS_KEYWORDS.iter().copied().collect();

    /// Injection shapes scanned over the normalized statement. These run
    /// against the raw text, comments and tautologies included, so they
    /// stay as regexes rather than going through the word lexer.
    static ref INJECTION_PATTERNS: Vec<(Regex, &'static str)> = vec![
        (Regex::new(r"--").unwrap(), "inline comment"),
        (Regex::new(r"/\*.*?\*/").unwrap(), "block comment"),
        (Regex::new(r";\s*\w+").unwrap(), "stacked statement"),
        (Regex::new(r"\bunion\s+select\b").unwrap(), "union injection"),
        (Regex::new(r"\bor\s+1\s*=\s*1\b").unwrap(), "tautology"),
        (Regex::new(r"\band\s+1\s*=\s*1\b").unwrap(), "tautology"),
        (Regex::new(r"\bor\s+'.*?'\s*=\s*'.*?'").unwrap(), "quoted tautology"),
        (Regex::new(r"'.*?'\s*or\s*'.*?'").unwrap(), "quoted tautology"),
        (Regex::new(r"\\x[0-9a-f]{2}").unwrap(), "hex escape"),
    ];
}

/// Configuration for the SQL validator.
#[derive(Debug, Clone)]
pub struct SqlValidatorConfig {
    /// Longest statement accepted, in characters.
    pub max_statement_length: usize,

    /// Maximum `select` occurrences before the statement is treated as a
    /// nested-subquery attack.
    pub max_nested_selects: usize,

    /// Validated-statement cache capacity.
    pub validation_cache_size: usize,
}

impl Default for SqlValidatorConfig {
    fn default() -> Self {
        Self {
            max_statement_length: 5_000,
            max_nested_selects: 5,
            validation_cache_size: 1_000,
        }
    }
}

impl SqlValidatorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_statement_length == 0 {
            return Err(FactError::Configuration(
                "max_statement_length must be greater than 0".to_string(),
            ));
        }
        if self.max_nested_selects == 0 {
            return Err(FactError::Configuration(
                "max_nested_selects must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Number of oldest cache entries dropped when the cache is full.
const CACHE_DRAIN_COUNT: usize = 100;

/// Insertion-ordered set of statement hashes that already passed.
struct ValidationCache {
    entries: HashMap<String, ()>,
    order: VecDeque<String>,
}

impl ValidationCache {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn contains(&self, hash: &str) -> bool {
        self.entries.contains_key(hash)
    }

    fn insert(&mut self, hash: String, capacity: usize) {
        if self.entries.len() >= capacity {
            for _ in 0..CACHE_DRAIN_COUNT.min(self.order.len()) {
                if let Some(oldest) = self.order.pop_front() {
                    self.entries.remove(&oldest);
                }
            }
        }
        if self.entries.insert(hash.clone(), ()).is_none() {
            self.order.push_back(hash);
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Read-only gate for SQL statements.
///
/// Validation is idempotent: a statement that passed once passes again
/// from the cache without re-running the scan or touching the database.
pub struct SqlValidator {
    config: SqlValidatorConfig,
    backend: Arc<dyn DatabaseBackend>,
    cache: Mutex<ValidationCache>,
}

impl SqlValidator {
    pub fn new(config: SqlValidatorConfig, backend: Arc<dyn DatabaseBackend>) -> Self {
        Self {
            config,
            backend,
            cache: Mutex::new(ValidationCache::new()),
        }
    }

    /// Validate a statement, short-circuiting on the first failure.
    pub async fn validate(&self, statement: &str) -> Result<()> {
        let hash = statement_hash(statement);

        if self.cache.lock().contains(&hash) {
            tracing::debug!(statement = truncate(statement), "sql validation cache hit");
            return Ok(());
        }

        let normalized = statement.trim().to_lowercase();
        let is_safe_pragma = normalized.starts_with("pragma table_info");

        if !is_safe_pragma && first_word(&normalized) != Some("select") {
            if normalized.starts_with("pragma") {
                return Err(FactError::Security(
                    "only PRAGMA table_info queries are allowed".to_string(),
                ));
            }
            return Err(FactError::Security(
                "only SELECT statements and PRAGMA table_info queries are allowed".to_string(),
            ));
        }

        // Single lexer pass: blocklist scan plus select counting, skipping
        // quoted strings and quoted identifiers.
        let scan = scan_words(&normalized);
        if let Some(keyword) = scan.blocked_keyword {
            return Err(FactError::Security(format!(
                "dangerous SQL keyword detected: {keyword}"
            )));
        }

        if !is_safe_pragma {
            for (pattern, label) in INJECTION_PATTERNS.iter() {
                if pattern.is_match(&normalized) {
                    tracing::warn!(
                        statement = truncate(statement),
                        pattern = label,
                        "sql injection pattern rejected"
                    );
                    return Err(FactError::Security(format!(
                        "potential SQL injection pattern detected: {label}"
                    )));
                }
            }
        }

        if statement.len() > self.config.max_statement_length {
            return Err(FactError::Security(
                "query too long - potential denial of service".to_string(),
            ));
        }

        if scan.select_count > self.config.max_nested_selects {
            return Err(FactError::Security(
                "too many nested subqueries - potential injection attack".to_string(),
            ));
        }

        // Cheap, non-executing syntax check through the backend.
        self.backend
            .explain_query_plan(statement)
            .await
            .map_err(|e| FactError::InvalidSql(format!("SQL syntax error: {e}")))?;

        self.cache
            .lock()
            .insert(hash, self.config.validation_cache_size);
        tracing::debug!(statement = truncate(statement), "sql validation passed");

        Ok(())
    }

    #[cfg(test)]
    fn cached_entries(&self) -> usize {
        self.cache.lock().len()
    }
}

fn statement_hash(statement: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(statement.trim().as_bytes());
    hex::encode(hasher.finalize())
}

fn first_word(normalized: &str) -> Option<&str> {
    normalized.split_whitespace().next()
}

fn truncate(statement: &str) -> &str {
    let end = statement
        .char_indices()
        .nth(100)
        .map(|(i, _)| i)
        .unwrap_or(statement.len());
    &statement[..end]
}

struct WordScan {
    blocked_keyword: Option<&'static str>,
    select_count: usize,
}

/// Walk the statement word by word, skipping `'...'` string literals and
/// `"..."` quoted identifiers so their contents cannot trip the blocklist.
fn scan_words(normalized: &str) -> WordScan {
    let mut blocked = None;
    let mut select_count = 0;
    let mut chars = normalized.chars().peekable();
    let mut word = String::new();

    let mut check_word = |word: &mut String, blocked: &mut Option<&'static str>| {
        if word.is_empty() {
            return;
        }
        if word.as_str() == "select" {
            select_count += 1;
        } else if let Some(keyword) = KEYWORD_BLOCKLIST.get(word.as_str()) {
            blocked.get_or_insert(*keyword);
        }
        word.clear();
    };

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                check_word(&mut word, &mut blocked);
                // Consume the literal; '' is an escaped quote inside it.
                while let Some(inner) = chars.next() {
                    if inner == '\'' {
                        if chars.peek() == Some(&'\'') {
                            chars.next();
                        } else {
                            break;
                        }
                    }
                }
            }
            '"' => {
                check_word(&mut word, &mut blocked);
                for inner in chars.by_ref() {
                    if inner == '"' {
                        break;
                    }
                }
            }
            c if c.is_ascii_alphanumeric() || c == '_' => word.push(c),
            _ => check_word(&mut word, &mut blocked),
        }
    }
    check_word(&mut word, &mut blocked);

    WordScan {
        blocked_keyword: blocked,
        select_count,
    }
}

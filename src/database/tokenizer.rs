//! Rewrite of Signal's custom full-text tokenizer.
//!
//! Signal registers `signal_tokenizer` inside the app; any other SQLite build
//! cannot open an FTS table declared with it. Exported copies declare the
//! table with the stock `unicode61` tokenizer instead.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

/// Tokenizer name registered only inside Signal Desktop
pub const VENDOR_TOKENIZER: &str = "signal_tokenizer";

/// Stock SQLite tokenizer used as the replacement
pub const REPLACEMENT_TOKENIZER: &str = "unicode61";

fn tokenize_clause() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"(?i)tokenize\s*=\s*['"]signal_tokenizer['"]"#)
            .expect("tokenize clause pattern is valid")
    })
}

/// Whether a statement declares the vendor tokenizer
pub fn references_vendor_tokenizer(sql: &str) -> bool {
    tokenize_clause().is_match(sql)
}

/// Replace the vendor `tokenize = '...'` clause with `tokenize='unicode61'`.
///
/// Statements without the clause are returned borrowed and unchanged.
pub fn rewrite_tokenizer(sql: &str) -> Cow<'_, str> {
    tokenize_clause().replace_all(sql, "tokenize='unicode61'")
}

// SPDX-License-Identifier: Apache-2.0

//! Statement Classifier
//!
//! Lexical classification of SQL text: the leading keyword decides the
//! statement kind, and for INSERT/UPDATE/DELETE the first identifier after
//! `INTO`/`UPDATE`/`FROM` is taken as the target table. This is not a SQL
//! parser. CTEs, multi-table statements and unusual dialect quoting can be
//! misread; those fall back to [`UNKNOWN_TABLE`] or to the first name seen.
//!
//! Classification only ever looks at the first statement, so callers must
//! reject batched input with [`is_single_statement`] before trusting it.
//! The scan is conservative: anything it cannot prove to be a comment or a
//! quoted literal counts as statement text, so a stray `;` rejects the
//! input rather than letting a second statement through.

use super::types::{Classification, StatementKind, UNKNOWN_TABLE};

pub const MULTIPLE_STATEMENTS: &str =
    "Multiple statements are not allowed. Submit one statement per call.";

/// Classifies a statement and, for writes, extracts its target table.
pub fn classify(sql: &str) -> Classification {
    let kind = statement_kind(sql);
    let target_table = if kind.is_write() {
        target_table(sql, kind)
    } else {
        UNKNOWN_TABLE.to_string()
    };
    Classification { kind, target_table }
}

/// Statement kind from the leading keyword. Empty input is `Unknown`.
pub fn statement_kind(sql: &str) -> StatementKind {
    let Some(keyword) = leading_keyword(sql) else {
        return StatementKind::Unknown;
    };
    match keyword.as_str() {
        "SELECT" => StatementKind::Select,
        "INSERT" => StatementKind::Insert,
        "UPDATE" => StatementKind::Update,
        "DELETE" => StatementKind::Delete,
        "CREATE" => StatementKind::Create,
        "ALTER" => StatementKind::Alter,
        "DROP" => StatementKind::Drop,
        "TRUNCATE" => StatementKind::Truncate,
        "BEGIN" | "START" => StatementKind::TransactionStart,
        "COMMIT" => StatementKind::TransactionCommit,
        "ROLLBACK" => StatementKind::TransactionRollback,
        _ => StatementKind::Unknown,
    }
}

/// First keyword of the statement, upper-cased, after comments and whitespace.
pub fn leading_keyword(sql: &str) -> Option<String> {
    let rest = skip_trivia(sql);
    let end = rest
        .find(|c: char| !is_ident_char(c))
        .unwrap_or(rest.len());
    if end == 0 {
        return None;
    }
    Some(rest[..end].to_ascii_uppercase())
}

/// Best-effort target table of a write, upper-cased and schema-qualified
/// when a qualifier is present.
pub fn target_table(sql: &str, kind: StatementKind) -> String {
    let body = skip_trivia(sql);
    let after = match kind {
        StatementKind::Insert => find_keyword(body, "INTO"),
        StatementKind::Update => find_keyword(body, "UPDATE"),
        StatementKind::Delete => find_keyword(body, "FROM"),
        _ => None,
    };

    after
        .map(|offset| read_table_reference(&body[offset..]))
        .filter(|name| !name.is_empty())
        .map(|name| name.to_ascii_uppercase())
        .unwrap_or_else(|| UNKNOWN_TABLE.to_string())
}

/// True when `sql` holds at most one statement. Only whitespace, comments
/// and further semicolons may follow the first top-level `;`.
pub fn is_single_statement(sql: &str) -> bool {
    let Some(end) = statement_end(sql) else {
        return true;
    };
    let mut rest = &sql[end + 1..];
    loop {
        rest = skip_trivia(rest);
        match rest.strip_prefix(';') {
            Some(next) => rest = next,
            None => return rest.is_empty(),
        }
    }
}

/// Byte offset of the first `;` outside quotes and comments.
fn statement_end(sql: &str) -> Option<usize> {
    let mut i = 0;
    while i < sql.len() {
        let rest = &sql[i..];
        if let Some(after) = strip_comment(rest) {
            i = sql.len() - after.len();
            continue;
        }
        match rest.as_bytes()[0] {
            q @ (b'\'' | b'"' | b'`') => {
                i += rest[1..].find(q as char).map_or(rest.len(), |p| p + 2);
            }
            b';' => return Some(i),
            _ => i += rest.chars().next().map_or(1, char::len_utf8),
        }
    }
    None
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Skips leading whitespace, `-- line` and `/* block */` comments.
fn skip_trivia(mut s: &str) -> &str {
    loop {
        s = s.trim_start();
        match strip_comment(s) {
            Some(rest) => s = rest,
            None => return s,
        }
    }
}

/// Strips one leading comment. `--` must be followed by whitespace (MySQL
/// reads `--x` as operators) and `/*!` is not a comment on MySQL, so
/// neither is treated as one.
fn strip_comment(s: &str) -> Option<&str> {
    if let Some(rest) = s.strip_prefix("--") {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return Some(rest.find('\n').map_or("", |i| &rest[i + 1..]));
        }
    } else if let Some(rest) = s.strip_prefix("/*") {
        if !rest.starts_with('!') {
            return Some(rest.find("*/").map_or("", |i| &rest[i + 2..]));
        }
    }
    None
}

/// Byte offset just past the first whole-word, case-insensitive match of
/// `keyword`, skipping quoted strings.
fn find_keyword(s: &str, keyword: &str) -> Option<usize> {
    let bytes = s.as_bytes();
    let kw = keyword.as_bytes();
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        if let Some(q) = quote {
            if b == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        if b == b'\'' {
            quote = Some(b);
            i += 1;
            continue;
        }

        let boundary_before = i == 0 || !is_ident_byte(bytes[i - 1]);
        let end = i + kw.len();
        if boundary_before
            && end <= bytes.len()
            && bytes[i..end].eq_ignore_ascii_case(kw)
            && (end == bytes.len() || !is_ident_byte(bytes[end]))
        {
            return Some(end);
        }
        i += 1;
    }
    None
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}

/// Reads `name`, `"name"`, `` `name` ``, `[name]` and dotted combinations
/// of those. Stops at whitespace, parentheses, commas or a semicolon.
fn read_table_reference(s: &str) -> String {
    let mut rest = skip_trivia(s);
    let mut parts: Vec<&str> = Vec::new();

    loop {
        let (part, remaining) = read_identifier_part(rest);
        if part.is_empty() {
            break;
        }
        parts.push(part);
        match remaining.strip_prefix('.') {
            Some(next) => rest = next,
            None => break,
        }
    }

    parts.join(".")
}

fn read_identifier_part(s: &str) -> (&str, &str) {
    let closing = match s.chars().next() {
        Some('"') => Some('"'),
        Some('`') => Some('`'),
        Some('[') => Some(']'),
        _ => None,
    };

    if let Some(close) = closing {
        let inner = &s[1..];
        return match inner.find(close) {
            Some(end) => (&inner[..end], &inner[end + 1..]),
            None => (inner, ""),
        };
    }

    let end = s
        .find(|c: char| {
            c.is_whitespace() || matches!(c, '(' | ')' | ';' | ',' | '.' | '"' | '`' | '[')
        })
        .unwrap_or(s.len());
    (&s[..end], &s[end..])
}

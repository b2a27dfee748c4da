//! Schema introspection helpers for migration prechecks and guarded upgrades.
//!
//! SQLite has no `ADD COLUMN IF NOT EXISTS` and no `ALTER COLUMN`, so units
//! consult these before issuing DDL.

use rusqlite::{Connection, OptionalExtension, params};
use tracing::debug;

pub fn table_exists(conn: &Connection, table: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT count(*) > 0 FROM sqlite_master WHERE type='table' AND name=?1",
        params![table],
        |row| row.get(0),
    )
}

pub fn index_exists(conn: &Connection, index: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT count(*) > 0 FROM sqlite_master WHERE type='index' AND name=?1",
        params![index],
        |row| row.get(0),
    )
}

/// False when either the table or the column is missing.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> rusqlite::Result<bool> {
    conn.query_row(
        "SELECT count(*) > 0 FROM pragma_table_info(?1) WHERE name=?2",
        params![table, column],
        |row| row.get(0),
    )
}

/// The column's declared default expression, as SQLite stored it.
///
/// `None` both when the column has no default and when it doesn't exist;
/// pair with [`column_exists`] where the difference matters.
pub fn column_default(
    conn: &Connection,
    table: &str,
    column: &str,
) -> rusqlite::Result<Option<String>> {
    let default: Option<Option<String>> = conn
        .query_row(
            "SELECT dflt_value FROM pragma_table_info(?1) WHERE name=?2",
            params![table, column],
            |row| row.get(0),
        )
        .optional()?;
    Ok(default.flatten())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnInfo {
    pub name: String,
    pub decl_type: String,
    pub not_null: bool,
    pub default: Option<String>,
    /// 1-based position within the primary key, 0 if not part of it.
    pub pk: i64,
}

pub fn table_columns(conn: &Connection, table: &str) -> rusqlite::Result<Vec<ColumnInfo>> {
    let mut stmt = conn.prepare(
        "SELECT name, type, \"notnull\", dflt_value, pk FROM pragma_table_info(?1) ORDER BY cid",
    )?;
    let rows = stmt.query_map(params![table], |row| {
        Ok(ColumnInfo {
            name: row.get(0)?,
            decl_type: row.get(1)?,
            not_null: row.get(2)?,
            default: row.get(3)?,
            pk: row.get(4)?,
        })
    })?;
    rows.collect()
}

/// Change a column's default by rebuilding the table.
///
/// The new table is created from the stored `CREATE TABLE` text with only the
/// target column's `DEFAULT` clause replaced, so column and table constraints
/// (`UNIQUE`, `CHECK`, `REFERENCES`, `COLLATE`, `AUTOINCREMENT`) survive. Rows
/// are copied across, explicit indexes and triggers are recreated, and the
/// `AUTOINCREMENT` counter is carried over. The table must not be the parent
/// of a foreign key while `foreign_keys` is on.
pub fn set_column_default(
    conn: &Connection,
    table: &str,
    column: &str,
    default_sql: &str,
) -> rusqlite::Result<()> {
    let columns = table_columns(conn, table)?;
    if !columns.iter().any(|c| c.name == column) {
        return Err(rusqlite::Error::InvalidColumnName(format!("{table}.{column}")));
    }

    let create_sql: String = conn.query_row(
        "SELECT sql FROM sqlite_master WHERE type='table' AND name=?1",
        params![table],
        |row| row.get(0),
    )?;
    let rebuilt = quote_ident(&format!("{table}__rebuild"));
    let create_rebuilt = rewrite_create_table(&create_sql, &rebuilt, column, default_sql)
        .ok_or_else(|| {
            rebuild_error(format!(
                "cannot locate column {column} in the definition of {table}"
            ))
        })?;

    let companions: Vec<String> = {
        let mut stmt = conn.prepare(
            "SELECT sql FROM sqlite_master
             WHERE tbl_name=?1 AND type IN ('index', 'trigger') AND sql IS NOT NULL",
        )?;
        let rows = stmt.query_map(params![table], |row| row.get(0))?;
        rows.collect::<rusqlite::Result<_>>()?
    };

    let sequence: Option<i64> = if table_exists(conn, "sqlite_sequence")? {
        conn.query_row(
            "SELECT seq FROM sqlite_sequence WHERE name=?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?
    } else {
        None
    };

    let names = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");
    let original = quote_ident(table);

    conn.execute_batch(&format!(
        "{create_rebuilt};
         INSERT INTO {rebuilt} ({names}) SELECT {names} FROM {original};
         DROP TABLE {original};
         ALTER TABLE {rebuilt} RENAME TO {original};"
    ))?;

    for sql in &companions {
        conn.execute_batch(sql)?;
    }

    if let Some(seq) = sequence {
        conn.execute(
            "UPDATE sqlite_sequence SET seq = MAX(seq, ?2) WHERE name = ?1",
            params![table, seq],
        )?;
        conn.execute(
            "INSERT INTO sqlite_sequence (name, seq)
             SELECT ?1, ?2 WHERE NOT EXISTS (SELECT 1 FROM sqlite_sequence WHERE name = ?1)",
            params![table, seq],
        )?;
    }

    debug!(
        "rebuilt {table} with {column} DEFAULT {default_sql} ({} indexes/triggers restored)",
        companions.len()
    );
    Ok(())
}

fn rebuild_error(message: String) -> rusqlite::Error {
    rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
        Some(message),
    )
}

const TABLE_CONSTRAINT_KEYWORDS: [&str; 5] = ["CONSTRAINT", "PRIMARY", "UNIQUE", "CHECK", "FOREIGN"];

/// `CREATE TABLE {new_name} (...)` from `create_sql`, with `column`'s default
/// replaced by `default_sql`. `None` if the column definition isn't found.
fn rewrite_create_table(
    create_sql: &str,
    new_name: &str,
    column: &str,
    default_sql: &str,
) -> Option<String> {
    let bytes = create_sql.as_bytes();
    let open = find_top_level(bytes, b'(')?;
    let close = matching_paren(bytes, open)?;

    let mut found = false;
    let parts: Vec<String> = split_top_level(&create_sql[open + 1..close])
        .into_iter()
        .map(|part| {
            if !found && defines_column(part, column) {
                found = true;
                replace_default(part, default_sql)
            } else {
                part.to_string()
            }
        })
        .collect();

    found.then(|| {
        format!(
            "CREATE TABLE {new_name} ({}){}",
            parts.join(","),
            &create_sql[close + 1..]
        )
    })
}

fn defines_column(part: &str, column: &str) -> bool {
    let Some(&(start, end)) = tokens(part).first() else {
        return false;
    };
    let word = &part[start..end];
    let quoted_inner = || word.get(1..word.len().saturating_sub(1)).unwrap_or("");
    match word.as_bytes()[0] {
        b'"' | b'`' | b'\'' => {
            let quote = &word[..1];
            quoted_inner()
                .replace(&quote.repeat(2), quote)
                .eq_ignore_ascii_case(column)
        }
        b'[' => quoted_inner().eq_ignore_ascii_case(column),
        _ => {
            !TABLE_CONSTRAINT_KEYWORDS
                .iter()
                .any(|k| word.eq_ignore_ascii_case(k))
                && word.eq_ignore_ascii_case(column)
        }
    }
}

fn replace_default(def: &str, default_sql: &str) -> String {
    let toks = tokens(def);
    let keyword = toks
        .iter()
        .skip(1)
        .position(|&(s, e)| def[s..e].eq_ignore_ascii_case("DEFAULT"))
        .map(|i| i + 1);

    match keyword {
        Some(k) => {
            let mut expr = k + 1;
            if let Some(&(s, e)) = toks.get(expr)
                && matches!(&def[s..e], "+" | "-")
            {
                expr += 1;
            }
            let end = toks.get(expr).map_or(def.len(), |t| t.1);
            format!(
                "{}DEFAULT ({default_sql}){}",
                &def[..toks[k].0],
                &def[end..]
            )
        }
        None => format!("{} DEFAULT ({default_sql})", def.trim_end()),
    }
}

/// End of the string literal, quoted identifier or comment starting at `i`.
fn skip_opaque(sql: &[u8], i: usize) -> Option<usize> {
    match sql[i] {
        q @ (b'\'' | b'"' | b'`') => {
            let mut j = i + 1;
            while j < sql.len() {
                if sql[j] == q {
                    if sql.get(j + 1) == Some(&q) {
                        j += 2;
                        continue;
                    }
                    return Some(j + 1);
                }
                j += 1;
            }
            Some(sql.len())
        }
        b'[' => Some(
            sql[i..]
                .iter()
                .position(|&b| b == b']')
                .map_or(sql.len(), |p| i + p + 1),
        ),
        b'-' if sql.get(i + 1) == Some(&b'-') => Some(
            sql[i..]
                .iter()
                .position(|&b| b == b'\n')
                .map_or(sql.len(), |p| i + p + 1),
        ),
        b'/' if sql.get(i + 1) == Some(&b'*') => Some(
            sql[i + 2..]
                .windows(2)
                .position(|w| w == b"*/")
                .map_or(sql.len(), |p| i + 2 + p + 2),
        ),
        _ => None,
    }
}

fn is_comment(sql: &[u8], i: usize) -> bool {
    matches!(&sql[i..], [b'-', b'-', ..] | [b'/', b'*', ..])
}

fn find_top_level(sql: &[u8], target: u8) -> Option<usize> {
    let mut i = 0;
    while i < sql.len() {
        if let Some(next) = skip_opaque(sql, i) {
            i = next;
            continue;
        }
        if sql[i] == target {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn matching_paren(sql: &[u8], open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut i = open;
    while i < sql.len() {
        if let Some(next) = skip_opaque(sql, i) {
            i = next;
            continue;
        }
        match sql[i] {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Split at commas outside parentheses, literals and comments.
fn split_top_level(body: &str) -> Vec<&str> {
    let sql = body.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    let mut i = 0;
    while i < sql.len() {
        if let Some(next) = skip_opaque(sql, i) {
            i = next;
            continue;
        }
        match sql[i] {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                parts.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
        i += 1;
    }
    parts.push(&body[start..]);
    parts
}

/// Byte spans of the top-level tokens of one column definition. A
/// parenthesised group is a single token; comments are dropped.
fn tokens(def: &str) -> Vec<(usize, usize)> {
    let sql = def.as_bytes();
    let is_word =
        |b: u8| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'$' | b'.') || b >= 0x80;

    let mut spans = Vec::new();
    let mut i = 0;
    while i < sql.len() {
        let b = sql[i];
        if b.is_ascii_whitespace() {
            i += 1;
        } else if let Some(next) = skip_opaque(sql, i) {
            if !is_comment(sql, i) {
                spans.push((i, next));
            }
            i = next;
        } else if b == b'(' {
            let end = matching_paren(sql, i).map_or(sql.len(), |c| c + 1);
            spans.push((i, end));
            i = end;
        } else if is_word(b) {
            let start = i;
            while i < sql.len() && is_word(sql[i]) {
                i += 1;
            }
            spans.push((start, i));
        } else {
            spans.push((i, i + 1));
            i += 1;
        }
    }
    spans
}

fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

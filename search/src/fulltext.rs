//! Exact/BM25 search against the external-content FTS5 table, with the
//! `LIKE` substring fallback used when FTS yields zero rows.

use crate::error::SearchError;
use crate::query::SortOrder;
use clip_store::record::{ContentType, RecordId};
use rusqlite::Connection;

/// App/type filters shared by the FTS and LIKE query paths.
#[derive(Debug, Clone, Default)]
pub struct Filters {
    pub app_bundle_id: Option<String>,
    pub content_type: Option<ContentType>,
}

impl Filters {
    fn append_where(&self, sql: &mut String, params: &mut Vec<Box<dyn rusqlite::ToSql>>) {
        if let Some(app) = &self.app_bundle_id {
            sql.push_str(" AND c.app_bundle_id = ?");
            params.push(Box::new(app.clone()));
        }
        if let Some(kind) = self.content_type {
            sql.push_str(" AND c.type = ?");
            params.push(Box::new(kind.as_str().to_string()));
        }
    }
}

/// Splits on whitespace/hyphens, strips wildcard characters, quotes each
/// term and joins with `AND`. Returns `None` if nothing remains (e.g. the
/// query was pure whitespace/wildcards) so the caller can skip FTS.
pub fn build_match_query(raw_query: &str) -> Option<String> {
    let terms: Vec<String> = raw_query
        .split(|c: char| c.is_whitespace() || c == '-')
        .map(strip_wildcards)
        .filter(|t| !t.is_empty())
        .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
        .collect();

    if terms.is_empty() {
        None
    } else {
        Some(terms.join(" AND "))
    }
}

fn strip_wildcards(term: &str) -> String {
    term.chars().filter(|c| *c != '*' && *c != '^').collect()
}

/// Escapes `%`, `_`, and `\` for a parameterized `LIKE ... ESCAPE '\'` scan.
pub fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if c == '%' || c == '_' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Runs an FTS MATCH query, returning candidate ids in the order spec.md
/// §4.2 requires. Empty `raw_query` means "no text constraint" and is not
/// valid here — callers route empty queries to `fetch_recent` instead.
pub fn search_fts(
    conn: &Connection,
    raw_query: &str,
    sort: SortOrder,
    filters: &Filters,
    limit: u32,
    offset: u32,
) -> Result<Vec<RecordId>, SearchError> {
    let Some(match_query) = build_match_query(raw_query) else {
        return Ok(Vec::new());
    };

    let order_by = match sort {
        SortOrder::Relevance => "c.is_pinned DESC, bm25(clipboard_fts) ASC, c.last_used_at DESC, c.id ASC",
        SortOrder::Recent => "c.is_pinned DESC, c.last_used_at DESC, c.id ASC",
    };

    let mut sql = String::from(
        "SELECT c.id FROM clipboard_fts \
         JOIN clipboard_items c ON c.rowid = clipboard_fts.rowid \
         WHERE clipboard_fts MATCH ?1",
    );
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(match_query)];
    filters.append_where(&mut sql, &mut params);
    sql.push_str(&format!(" ORDER BY {order_by} LIMIT ?{} OFFSET ?{}", params.len() + 1, params.len() + 2));
    params.push(Box::new(limit as i64));
    params.push(Box::new(offset as i64));

    run_id_query(conn, &sql, &params)
}

/// `LIKE '%term%'` scan with SQL wildcard escaping, used when an FTS query
/// that should have matched (substring-class patterns: CJK runs,
/// `snake_case`/`kebab-case` identifiers) returns zero rows.
pub fn search_like(
    conn: &Connection,
    raw_query: &str,
    sort: SortOrder,
    filters: &Filters,
    limit: u32,
    offset: u32,
) -> Result<Vec<RecordId>, SearchError> {
    let escaped = escape_like(raw_query);
    let pattern = format!("%{escaped}%");

    let order_by = match sort {
        SortOrder::Relevance | SortOrder::Recent => "c.is_pinned DESC, c.last_used_at DESC, c.id ASC",
    };

    let mut sql = String::from(
        "SELECT c.id FROM clipboard_items c \
         WHERE (c.plain_text LIKE ?1 ESCAPE '\\' OR c.note LIKE ?1 ESCAPE '\\')",
    );
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(pattern)];
    filters.append_where(&mut sql, &mut params);
    sql.push_str(&format!(" ORDER BY {order_by} LIMIT ?{} OFFSET ?{}", params.len() + 1, params.len() + 2));
    params.push(Box::new(limit as i64));
    params.push(Box::new(offset as i64));

    run_id_query(conn, &sql, &params)
}

pub fn count_fts(conn: &Connection, raw_query: &str, filters: &Filters) -> Result<i64, SearchError> {
    let Some(match_query) = build_match_query(raw_query) else {
        return Ok(0);
    };
    let mut sql = String::from(
        "SELECT COUNT(*) FROM clipboard_fts \
         JOIN clipboard_items c ON c.rowid = clipboard_fts.rowid \
         WHERE clipboard_fts MATCH ?1",
    );
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(match_query)];
    filters.append_where(&mut sql, &mut params);

    let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();
    conn.query_row(&sql, refs.as_slice(), |r| r.get(0))
        .map_err(Into::into)
}

pub fn count_like(conn: &Connection, raw_query: &str, filters: &Filters) -> Result<i64, SearchError> {
    let escaped = escape_like(raw_query);
    let pattern = format!("%{escaped}%");
    let mut sql = String::from(
        "SELECT COUNT(*) FROM clipboard_items c \
         WHERE (c.plain_text LIKE ?1 ESCAPE '\\' OR c.note LIKE ?1 ESCAPE '\\')",
    );
    let mut params: Vec<Box<dyn rusqlite::ToSql>> = vec![Box::new(pattern)];
    filters.append_where(&mut sql, &mut params);

    let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();
    conn.query_row(&sql, refs.as_slice(), |r| r.get(0))
        .map_err(Into::into)
}

fn run_id_query(
    conn: &Connection,
    sql: &str,
    params: &[Box<dyn rusqlite::ToSql>],
) -> Result<Vec<RecordId>, SearchError> {
    let refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|b| b.as_ref()).collect();
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(refs.as_slice(), |row| {
        let id_str: String = row.get(0)?;
        Ok(id_str)
    })?;

    let mut out = Vec::new();
    for row in rows {
        let id_str = row?;
        if let Some(id) = RecordId::parse(&id_str) {
            out.push(id);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    mod build_match_query {
        use super::*;

        #[test]
        fn splits_on_whitespace_and_hyphens_and_quotes_each_term() {
            let q = build_match_query("hello-world foo").unwrap();
            assert_eq!(q, "\"hello\" AND \"world\" AND \"foo\"");
        }

        #[test]
        fn strips_wildcards() {
            let q = build_match_query("foo*bar").unwrap();
            assert_eq!(q, "\"foobar\"");
        }

        #[test]
        fn empty_after_stripping_returns_none() {
            assert!(build_match_query("   ").is_none());
            assert!(build_match_query("***").is_none());
        }
    }

    mod escape_like {
        use super::*;

        #[test]
        fn escapes_percent_underscore_and_backslash() {
            assert_eq!(escape_like("50%_off\\deal"), "50\\%\\_off\\\\deal");
        }
    }
}

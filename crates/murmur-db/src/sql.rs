//! Helpers for statements over id lists.
//!
//! Id lists are never spliced into SQL text. Each chunk gets its own
//! `?,?,...` placeholder list and the ids are bound as parameters.

use rusqlite::{types::ToSql, Connection, Row};

use crate::Result;

/// Upper bound on ids bound in one statement (SQLite's default limit is 999).
pub const MAX_CHUNK: usize = 500;

/// `?1,?2,...,?n` starting at parameter index `first`.
pub fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(",")
}

/// Execute `template` once per chunk of `ids`, returning total affected rows.
///
/// `template` must contain a single `{ids}` marker; the chunk is bound after
/// `leading` parameters.
pub fn execute_chunked(
    conn: &Connection,
    template: &str,
    leading: &[&dyn ToSql],
    ids: &[i64],
) -> Result<usize> {
    let mut affected = 0;
    for chunk in ids.chunks(MAX_CHUNK) {
        let sql = template.replace("{ids}", &placeholders(leading.len() + 1, chunk.len()));
        let params = bind(leading, chunk);
        affected += conn.execute(&sql, &params[..])?;
    }
    Ok(affected)
}

/// Run a query once per chunk of `ids` and collect every mapped row.
pub fn query_chunked<T>(
    conn: &Connection,
    template: &str,
    leading: &[&dyn ToSql],
    ids: &[i64],
    mut map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for chunk in ids.chunks(MAX_CHUNK) {
        let sql = template.replace("{ids}", &placeholders(leading.len() + 1, chunk.len()));
        let params = bind(leading, chunk);
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(&params[..], &mut map)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        out.extend(rows);
    }
    Ok(out)
}

fn bind<'a>(leading: &[&'a dyn ToSql], chunk: &'a [i64]) -> Vec<&'a dyn ToSql> {
    let mut params: Vec<&'a dyn ToSql> = Vec::with_capacity(leading.len() + chunk.len());
    params.extend_from_slice(leading);
    params.extend(chunk.iter().map(|id| id as &dyn ToSql));
    params
}

/// Sorted, de-duplicated copy of an id list.
pub fn unique_ids(ids: impl IntoIterator<Item = i64>) -> Vec<i64> {
    let mut ids: Vec<i64> = ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

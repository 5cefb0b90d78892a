//! Identifier allow-list and dialect quoting.
//!
//! Identifiers are never bound as values, so every table and column name that
//! reaches SQL text must match one of these patterns first.

use crate::error::{DbError, DbResult};
use crate::models::DatabaseType;
use regex::Regex;
use std::sync::LazyLock;

/// `name` or `table.name`.
static COLUMN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*(\.[A-Za-z_][A-Za-z0-9_]*)?$").unwrap()
});

/// Select-list entries: a column, `*`, `table.*`, an aggregate, each with an optional alias.
static SELECTABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?ix)^
        (?P<expr>
            \*
          | [a-z_][a-z0-9_]*\.\*
          | (?:count|sum|avg|min|max)\(\s*(?:\*|[a-z_][a-z0-9_]*(?:\.[a-z_][a-z0-9_]*)?)\s*\)
          | [a-z_][a-z0-9_]*(?:\.[a-z_][a-z0-9_]*)?
        )
        (?:\s+as\s+(?P<alias>[a-z_][a-z0-9_]*))?
        $",
    )
    .unwrap()
});

/// `FUNC(arg)` split into its parts.
static AGGREGATE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(count|sum|avg|min|max)\(\s*([^)\s]+)\s*\)$").unwrap()
});

/// `table` or `table AS alias` / `table alias`.
static TABLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([A-Za-z_][A-Za-z0-9_]*)(?:\s+(?:as\s+)?([A-Za-z_][A-Za-z0-9_]*))?$").unwrap()
});

/// Accept a plain or table-qualified column name.
pub fn validate_column(name: &str) -> DbResult<()> {
    if COLUMN.is_match(name) {
        Ok(())
    } else {
        Err(DbError::invalid_input(format!(
            "Invalid column identifier: {name:?}"
        )))
    }
}

/// Accept a column with no table qualifier, as used in INSERT/UPDATE lists.
pub fn validate_plain_column(name: &str) -> DbResult<()> {
    validate_column(name)?;
    if name.contains('.') {
        return Err(DbError::invalid_input(format!(
            "Qualified column not allowed here: {name:?}"
        )));
    }
    Ok(())
}

/// Accept anything allowed in a select list or HAVING clause.
pub fn validate_selectable(expr: &str) -> DbResult<()> {
    if SELECTABLE.is_match(expr.trim()) {
        Ok(())
    } else {
        Err(DbError::invalid_input(format!(
            "Invalid select expression: {expr:?}"
        )))
    }
}

pub fn validate_table(name: &str) -> DbResult<()> {
    if TABLE.is_match(name.trim()) {
        Ok(())
    } else {
        Err(DbError::invalid_input(format!(
            "Invalid table identifier: {name:?}"
        )))
    }
}

/// Quote one identifier segment for `db`.
fn quote_segment(segment: &str, db: DatabaseType) -> String {
    if segment == "*" {
        return segment.to_string();
    }
    match db {
        DatabaseType::MySQL => format!("`{segment}`"),
        DatabaseType::PostgreSQL | DatabaseType::SQLite => format!("\"{segment}\""),
    }
}

/// Quote a (possibly qualified) column name. Input must already be validated.
pub fn quote_column(name: &str, db: DatabaseType) -> String {
    name.split('.')
        .map(|segment| quote_segment(segment, db))
        .collect::<Vec<_>>()
        .join(".")
}

/// Quote a select-list expression: column, star, aggregate, optional alias.
pub fn quote_selectable(expr: &str, db: DatabaseType) -> String {
    let expr = expr.trim();
    let Some(caps) = SELECTABLE.captures(expr) else {
        return quote_column(expr, db);
    };
    let inner = caps.name("expr").map(|m| m.as_str()).unwrap_or(expr);
    let quoted = match AGGREGATE.captures(inner) {
        Some(agg) => format!(
            "{}({})",
            agg[1].to_uppercase(),
            quote_column(&agg[2], db)
        ),
        None => quote_column(inner, db),
    };
    match caps.name("alias") {
        Some(alias) => format!("{} AS {}", quoted, quote_segment(alias.as_str(), db)),
        None => quoted,
    }
}

/// Quote a table reference with an optional alias.
pub fn quote_table(name: &str, db: DatabaseType) -> String {
    let name = name.trim();
    match TABLE.captures(name) {
        Some(caps) => match caps.get(2) {
            Some(alias) => format!(
                "{} AS {}",
                quote_segment(&caps[1], db),
                quote_segment(alias.as_str(), db)
            ),
            None => quote_segment(&caps[1], db),
        },
        None => quote_segment(name, db),
    }
}

/// The row key a driver reports for column `name` (`users.id` comes back as `id`).
pub fn result_key(name: &str) -> &str {
    name.rsplit('.').next().unwrap_or(name)
}

/// Whether a select list yields a row key `key`. An empty list and star
/// entries select every column.
pub fn selects_key(columns: &[String], key: &str) -> bool {
    columns.is_empty()
        || columns.iter().any(|expr| {
            let Some(caps) = SELECTABLE.captures(expr.trim()) else {
                return false;
            };
            if let Some(alias) = caps.name("alias") {
                return alias.as_str() == key;
            }
            let inner = caps.name("expr").map(|m| m.as_str()).unwrap_or_default();
            inner.ends_with('*') || result_key(inner) == key
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_columns() {
        assert!(validate_column("id").is_ok());
        assert!(validate_column("users.created_at").is_ok());
        assert!(validate_column("_private1").is_ok());
    }

    #[test]
    fn test_rejects_injection_attempts() {
        for bad in [
            "id; DROP TABLE users",
            "name'--",
            "1id",
            "a.b.c",
            "",
            "id)",
            "na me",
        ] {
            assert!(validate_column(bad).is_err(), "accepted {bad:?}");
        }
        assert!(validate_selectable("COUNT(*); DELETE FROM t").is_err());
        assert!(validate_table("users; --").is_err());
    }

    #[test]
    fn test_selectable_forms() {
        for ok in [
            "*",
            "users.*",
            "name AS label",
            "COUNT(*)",
            "sum(orders.total) as revenue",
            "max( price )",
        ] {
            assert!(validate_selectable(ok).is_ok(), "rejected {ok:?}");
        }
        assert!(validate_selectable("upper(name)").is_err());
    }

    #[test]
    fn test_plain_column() {
        assert!(validate_plain_column("name").is_ok());
        assert!(validate_plain_column("users.name").is_err());
    }

    #[test]
    fn test_quoting_per_dialect() {
        assert_eq!(quote_column("users.id", DatabaseType::MySQL), "`users`.`id`");
        assert_eq!(quote_column("users.*", DatabaseType::PostgreSQL), "\"users\".*");
        assert_eq!(
            quote_selectable("count(*) as total", DatabaseType::SQLite),
            "COUNT(*) AS \"total\""
        );
        assert_eq!(
            quote_selectable("name AS label", DatabaseType::MySQL),
            "`name` AS `label`"
        );
        assert_eq!(quote_table("users u", DatabaseType::SQLite), "\"users\" AS \"u\"");
        assert_eq!(quote_table("users", DatabaseType::MySQL), "`users`");
    }

    #[test]
    fn test_result_key() {
        assert_eq!(result_key("users.id"), "id");
        assert_eq!(result_key("id"), "id");
    }

    #[test]
    fn test_selects_key() {
        let cols = |list: &[&str]| list.iter().map(|c| c.to_string()).collect::<Vec<_>>();
        assert!(selects_key(&[], "id"));
        assert!(selects_key(&cols(&["*"]), "id"));
        assert!(selects_key(&cols(&["e.*"]), "id"));
        assert!(selects_key(&cols(&["name", "events.id"]), "id"));
        assert!(selects_key(&cols(&["pk AS id"]), "id"));
        assert!(!selects_key(&cols(&["name"]), "id"));
        assert!(!selects_key(&cols(&["id AS event_id"]), "id"));
        assert!(!selects_key(&cols(&["COUNT(id)"]), "id"));
    }
}

//! Offset, cursor and simple pagination, plus chunked iteration.
//!
//! Every operation runs on clones of the borrowed builder, so the caller's
//! query state is never modified.

use super::builder::QueryBuilder;
use super::identifier::{result_key, selects_key, validate_column};
use super::state::{ConditionValue, Connector, Operator, Order};
use crate::error::{DbError, DbResult};
use crate::models::{
    CursorPaginationResult, PaginationResult, QueryParam, Row, SimplePaginationResult,
};
use serde_json::Value as JsonValue;
use tracing::debug;

pub struct PaginationEngine<'a> {
    builder: &'a QueryBuilder,
}

impl<'a> PaginationEngine<'a> {
    pub fn new(builder: &'a QueryBuilder) -> Self {
        Self { builder }
    }

    /// One page plus the total count. `page` is clamped into `[1, last_page]`.
    pub async fn paginate(&self, page: u64, per_page: u64) -> DbResult<PaginationResult> {
        check_size("per_page", per_page)?;
        self.builder.check()?;

        let total = self.builder.count().await?;
        let last_page = total.div_ceil(per_page).max(1);
        let current_page = page.clamp(1, last_page);
        let offset = (current_page - 1) * per_page;

        let data = self
            .page_query(&format!("page:{current_page}:{per_page}"), per_page, offset)
            .get()
            .await?;

        let (from, to) = if data.is_empty() {
            (None, None)
        } else {
            (Some(offset + 1), Some(offset + data.len() as u64))
        };
        debug!(
            table = %self.builder.table_name(),
            total,
            current_page,
            last_page,
            "Paginated"
        );
        Ok(PaginationResult {
            data,
            total,
            per_page,
            current_page,
            last_page,
            from,
            to,
            next_page: (current_page < last_page).then_some(current_page + 1),
            prev_page: (current_page > 1).then_some(current_page - 1),
        })
    }

    /// Offset pagination that over-fetches one row instead of counting.
    pub async fn simple_paginate(
        &self,
        page: u64,
        per_page: u64,
    ) -> DbResult<SimplePaginationResult> {
        check_size("per_page", per_page)?;
        let current_page = page.max(1);
        let offset = (current_page - 1).saturating_mul(per_page);

        let mut data = self
            .page_query(
                &format!("simple:{current_page}:{per_page}"),
                per_page.saturating_add(1),
                offset,
            )
            .get()
            .await?;
        let has_more = trim_extra(&mut data, per_page);

        Ok(SimplePaginationResult {
            data,
            per_page,
            current_page,
            has_more,
            next_page: has_more.then_some(current_page + 1),
            prev_page: (current_page > 1).then_some(current_page - 1),
        })
    }

    /// Keyset pagination on `column`, which must be totally ordered.
    ///
    /// Any ordering already on the builder is replaced by `column`, which must
    /// be part of the select list. When `cursor` is given, one extra
    /// single-row query finds the cursor of the previous page.
    pub async fn cursor_paginate(
        &self,
        column: &str,
        cursor: Option<QueryParam>,
        per_page: u64,
        descending: bool,
    ) -> DbResult<CursorPaginationResult> {
        check_size("per_page", per_page)?;
        validate_column(column)?;
        let key = result_key(column);
        if !selects_key(&self.builder.state().columns, key) {
            return Err(DbError::invalid_input(format!(
                "Cursor column '{column}' must be in the select list"
            )));
        }

        let suffix = cursor_suffix("cursor", column, cursor.as_ref(), per_page, descending);
        let mut query = self.keyset_query(&suffix, column, descending);
        if let Some(cursor) = &cursor {
            let operator = if descending { Operator::Lt } else { Operator::Gt };
            query = query.push_condition(
                Connector::And,
                column,
                operator,
                ConditionValue::Single(cursor.clone()),
            );
        }
        let mut data = query.limit(per_page.saturating_add(1)).get().await?;
        let has_more = trim_extra(&mut data, per_page);

        let next_cursor = if has_more {
            data.last().and_then(|row| row.get(key)).cloned()
        } else {
            None
        };

        let prev_cursor = match &cursor {
            Some(cursor) => self.lookback(column, cursor, per_page, descending).await?,
            None => None,
        };

        Ok(CursorPaginationResult {
            data,
            per_page,
            has_more,
            next_cursor,
            has_previous: cursor.is_some(),
            prev_cursor,
        })
    }

    /// Feed `callback` pages of `size` rows until the rows run out or the
    /// callback returns false. Returns whether every page was delivered.
    ///
    /// Pages are selected by offset, so concurrent writes to the table can
    /// make rows repeat or go missing. Order the builder on a stable column
    /// to get deterministic pages.
    pub async fn chunk<F>(&self, size: u64, mut callback: F) -> DbResult<bool>
    where
        F: FnMut(Vec<Row>) -> bool,
    {
        check_size("chunk size", size)?;
        let mut index: u64 = 0;
        loop {
            let rows = self
                .page_query(&format!("chunk:{index}:{size}"), size, index.saturating_mul(size))
                .get()
                .await?;
            let fetched = rows.len() as u64;
            if fetched == 0 {
                return Ok(true);
            }
            debug!(table = %self.builder.table_name(), chunk = index, rows = fetched, "Chunk fetched");
            if !callback(rows) {
                return Ok(false);
            }
            if fetched < size {
                return Ok(true);
            }
            index += 1;
        }
    }

    fn page_query(&self, suffix: &str, limit: u64, offset: u64) -> QueryBuilder {
        self.builder.derived(suffix).limit(limit).offset(offset)
    }

    /// A clone ordered only by `column`, with any limit and offset removed.
    fn keyset_query(&self, suffix: &str, column: &str, descending: bool) -> QueryBuilder {
        let mut query = self.builder.derived(suffix);
        let state = query.state_mut();
        state.orders = vec![Order {
            column: column.to_string(),
            descending,
        }];
        state.limit = None;
        state.offset = None;
        query
    }

    /// The cursor that leads to the page before the one starting after `cursor`.
    ///
    /// Walks back from `cursor` (inclusive) in the opposite direction and
    /// skips one page; the row found there is the previous page's cursor.
    /// No row means the previous page is the first page.
    async fn lookback(
        &self,
        column: &str,
        cursor: &QueryParam,
        per_page: u64,
        descending: bool,
    ) -> DbResult<Option<JsonValue>> {
        let operator = if descending { Operator::Ge } else { Operator::Le };
        let suffix = cursor_suffix("cursor_prev", column, Some(cursor), per_page, descending);
        let mut query = self
            .keyset_query(&suffix, column, !descending)
            .push_condition(
                Connector::And,
                column,
                operator,
                ConditionValue::Single(cursor.clone()),
            )
            .limit(1)
            .offset(per_page);
        query.state_mut().columns = vec![column.to_string()];

        let row = query.get().await?.into_iter().next();
        Ok(row.and_then(|mut row| row.remove(result_key(column))))
    }
}

/// Cache key suffix for one cursor page. Every input that changes the rows
/// is part of it, so pages never share an entry.
fn cursor_suffix(
    kind: &str,
    column: &str,
    cursor: Option<&QueryParam>,
    per_page: u64,
    descending: bool,
) -> String {
    let direction = if descending { "desc" } else { "asc" };
    let position = match cursor {
        Some(value) => serde_json::to_string(value).unwrap_or_default(),
        None => "start".to_string(),
    };
    format!("{kind}:{column}:{direction}:{per_page}:{position}")
}

fn check_size(what: &str, size: u64) -> DbResult<()> {
    if size == 0 {
        return Err(DbError::invalid_input(format!("{what} must be at least 1")));
    }
    Ok(())
}

/// Drop the over-fetched row. Returns whether there was one.
fn trim_extra(rows: &mut Vec<Row>, per_page: u64) -> bool {
    let keep = usize::try_from(per_page).unwrap_or(usize::MAX);
    if rows.len() > keep {
        rows.truncate(keep);
        true
    } else {
        false
    }
}

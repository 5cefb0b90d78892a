//! Fluent query builder.
//!
//! Building methods consume and return the builder; mistakes (bad identifiers,
//! wrong value shapes) are recorded and reported by the first execution call.
//! Execution borrows a handle from the connection manager per statement.

use super::grammar::{CompiledQuery, Grammar};
use super::identifier::{
    result_key, validate_column, validate_plain_column, validate_selectable, validate_table,
};
use super::pagination::PaginationEngine;
use super::state::{
    Clause, Condition, ConditionValue, Connector, Join, JoinKind, Operator, Order, QueryState,
    ValueShape,
};
use crate::anonymize::FieldSpecs;
use crate::database::Database;
use crate::db::{ConnectionHandle, TransactionCoordinator};
use crate::error::{DbError, DbResult};
use crate::models::{
    CursorPaginationResult, DatabaseType, PaginationResult, QueryParam, Row,
    SimplePaginationResult,
};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Accumulates a query against one table of one logical connection.
#[derive(Clone)]
pub struct QueryBuilder {
    db: Database,
    connection: String,
    state: QueryState,
}

impl QueryBuilder {
    pub(crate) fn new(db: Database, connection: impl Into<String>, table: &str) -> Self {
        let mut state = QueryState::new(table.trim());
        if let Err(e) = validate_table(table) {
            state.record_error(e.to_string());
        }
        Self {
            db,
            connection: connection.into(),
            state,
        }
    }

    pub fn connection_name(&self) -> &str {
        &self.connection
    }

    pub fn table_name(&self) -> &str {
        self.state.base_table()
    }

    pub fn state(&self) -> &QueryState {
        &self.state
    }

    // Building

    /// Add columns to the select list. Accepts `col`, `t.col`, `*`, `t.*`,
    /// aggregates like `COUNT(*)`, each optionally `AS alias`.
    pub fn select<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for column in columns {
            let column = column.into();
            match validate_selectable(&column) {
                Ok(()) => self.state.columns.push(column.trim().to_string()),
                Err(e) => self.state.record_error(e.to_string()),
            }
        }
        self
    }

    /// `column operator value`, e.g. `where_("age", ">=", 18)`.
    /// Comparing with NULL through `=` or `!=` becomes `IS [NOT] NULL`.
    pub fn where_(self, column: &str, operator: &str, value: impl Into<QueryParam>) -> Self {
        self.push_where(Connector::And, column, operator, value.into())
    }

    pub fn or_where(self, column: &str, operator: &str, value: impl Into<QueryParam>) -> Self {
        self.push_where(Connector::Or, column, operator, value.into())
    }

    pub fn where_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<QueryParam>,
    {
        self.push_list(Connector::And, column, Operator::In, values)
    }

    pub fn or_where_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<QueryParam>,
    {
        self.push_list(Connector::Or, column, Operator::In, values)
    }

    pub fn where_not_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<QueryParam>,
    {
        self.push_list(Connector::And, column, Operator::NotIn, values)
    }

    pub fn or_where_not_in<I, V>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<QueryParam>,
    {
        self.push_list(Connector::Or, column, Operator::NotIn, values)
    }

    pub fn where_between(
        self,
        column: &str,
        low: impl Into<QueryParam>,
        high: impl Into<QueryParam>,
    ) -> Self {
        let value = ConditionValue::Pair(low.into(), high.into());
        self.push_condition(Connector::And, column, Operator::Between, value)
    }

    pub fn or_where_between(
        self,
        column: &str,
        low: impl Into<QueryParam>,
        high: impl Into<QueryParam>,
    ) -> Self {
        let value = ConditionValue::Pair(low.into(), high.into());
        self.push_condition(Connector::Or, column, Operator::Between, value)
    }

    pub fn where_not_between(
        self,
        column: &str,
        low: impl Into<QueryParam>,
        high: impl Into<QueryParam>,
    ) -> Self {
        let value = ConditionValue::Pair(low.into(), high.into());
        self.push_condition(Connector::And, column, Operator::NotBetween, value)
    }

    pub fn or_where_not_between(
        self,
        column: &str,
        low: impl Into<QueryParam>,
        high: impl Into<QueryParam>,
    ) -> Self {
        let value = ConditionValue::Pair(low.into(), high.into());
        self.push_condition(Connector::Or, column, Operator::NotBetween, value)
    }

    pub fn where_null(self, column: &str) -> Self {
        self.push_condition(Connector::And, column, Operator::IsNull, ConditionValue::None)
    }

    pub fn or_where_null(self, column: &str) -> Self {
        self.push_condition(Connector::Or, column, Operator::IsNull, ConditionValue::None)
    }

    pub fn where_not_null(self, column: &str) -> Self {
        self.push_condition(Connector::And, column, Operator::IsNotNull, ConditionValue::None)
    }

    pub fn or_where_not_null(self, column: &str) -> Self {
        self.push_condition(Connector::Or, column, Operator::IsNotNull, ConditionValue::None)
    }

    /// AND a parenthesized group built by `build`.
    ///
    /// ```ignore
    /// db.table("users")
    ///     .where_("active", "=", true)
    ///     .where_group(|q| q.where_("role", "=", "admin").or_where("karma", ">", 100));
    /// ```
    pub fn where_group<F>(self, build: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.push_group(Connector::And, build)
    }

    pub fn or_where_group<F>(self, build: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        self.push_group(Connector::Or, build)
    }

    /// `INNER JOIN table ON first operator second`.
    pub fn join(self, table: &str, first: &str, operator: &str, second: &str) -> Self {
        self.push_join(JoinKind::Inner, table, first, operator, second)
    }

    pub fn left_join(self, table: &str, first: &str, operator: &str, second: &str) -> Self {
        self.push_join(JoinKind::Left, table, first, operator, second)
    }

    pub fn group_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for column in columns {
            let column = column.into();
            match validate_column(&column) {
                Ok(()) => self.state.group_by.push(column),
                Err(e) => self.state.record_error(e.to_string()),
            }
        }
        self
    }

    /// `HAVING expr operator value`; `expr` may be a column or an aggregate.
    pub fn having(mut self, expr: &str, operator: &str, value: impl Into<QueryParam>) -> Self {
        if let Err(e) = validate_selectable(expr) {
            self.state.record_error(e.to_string());
            return self;
        }
        match parse_value_operator(operator, value.into()) {
            Ok((operator, value)) => self.state.havings.push(Clause {
                connector: Connector::And,
                condition: Condition::Basic {
                    column: expr.trim().to_string(),
                    operator,
                    value,
                },
            }),
            Err(e) => self.state.record_error(e.to_string()),
        }
        self
    }

    pub fn order_by(self, column: &str) -> Self {
        self.push_order(column, false)
    }

    pub fn order_by_desc(self, column: &str) -> Self {
        self.push_order(column, true)
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.state.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.state.offset = Some(offset);
        self
    }

    /// Column PostgreSQL inserts read the new id from. Defaults to `id`.
    pub fn primary_key(mut self, column: &str) -> Self {
        match validate_plain_column(column) {
            Ok(()) => self.state.primary_key = column.to_string(),
            Err(e) => self.state.record_error(e.to_string()),
        }
        self
    }

    /// Cache read results for `ttl`, or the cache's default TTL when `None`.
    pub fn cache(mut self, ttl: Option<Duration>) -> Self {
        self.state.cache_mut().ttl = ttl;
        self
    }

    /// Cache under an explicit key instead of the statement hash.
    pub fn cache_key(mut self, key: impl Into<String>) -> Self {
        self.state.cache_mut().key = Some(key.into());
        self
    }

    /// Tag cached results. Tags are registered against this table so writes
    /// to it invalidate them.
    pub fn cache_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let directive = self.state.cache_mut();
        for tag in tags {
            let tag = tag.into();
            if !directive.tags.contains(&tag) {
                directive.tags.push(tag);
            }
        }
        self
    }

    /// Pass returned rows through the anonymizer.
    pub fn anonymize(mut self, specs: FieldSpecs) -> Self {
        self.state.anonymize = Some(specs);
        self
    }

    // Reads

    pub async fn get(&self) -> DbResult<Vec<Row>> {
        self.check()?;
        let handle = self.read_handle().await?;
        let compiled = Grammar::new(handle.db_type()).compile_select(&self.state)?;
        let rows = self.fetch_rows(&handle, &compiled).await?;
        self.finish_rows(rows)
    }

    pub async fn first(&self) -> DbResult<Option<Row>> {
        let rows = self.derived("first").limit(1).get().await?;
        Ok(rows.into_iter().next())
    }

    /// Row count under the current filters, ignoring limit and offset.
    pub async fn count(&self) -> DbResult<u64> {
        self.check()?;
        let query = self.derived("count");
        let handle = query.read_handle().await?;
        let compiled = Grammar::new(handle.db_type()).compile_count(&query.state)?;
        let rows = query.fetch_rows(&handle, &compiled).await?;
        let value = rows
            .first()
            .and_then(|row| row.get("aggregate"))
            .cloned()
            .unwrap_or(JsonValue::Null);
        aggregate_to_u64(&value)
    }

    pub async fn exists(&self) -> DbResult<bool> {
        let rows = self.derived("exists").limit(1).get().await?;
        Ok(!rows.is_empty())
    }

    /// Values of one column, in result order.
    pub async fn pluck(&self, column: &str) -> DbResult<Vec<JsonValue>> {
        validate_column(column)?;
        let mut query = self.derived(&format!("pluck:{column}"));
        query.state.columns = vec![column.to_string()];
        let key = result_key(column);
        let rows = query.get().await?;
        Ok(rows
            .into_iter()
            .map(|mut row| row.remove(key).unwrap_or(JsonValue::Null))
            .collect())
    }

    // Writes

    /// Insert one row. Returns the new id when the backend reports one.
    pub async fn insert<I, K, V>(&self, values: I) -> DbResult<Option<i64>>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<QueryParam>,
    {
        self.check()?;
        let values = collect_values(values)?;
        let handle = self.write_handle().await?;
        let compiled = Grammar::new(handle.db_type()).compile_insert(&self.state, &values)?;

        let id = if handle.db_type() == DatabaseType::PostgreSQL {
            let rows = handle.fetch_all(&compiled.sql, &compiled.bindings).await?;
            rows.first()
                .and_then(|row| row.get(&self.state.primary_key))
                .and_then(JsonValue::as_i64)
        } else {
            handle
                .execute(&compiled.sql, &compiled.bindings)
                .await?
                .last_insert_id
        };
        info!(
            connection = %self.connection,
            table = %self.table_name(),
            id = ?id,
            "Row inserted"
        );
        self.db.invalidate_table(self.table_name()).await;
        Ok(id)
    }

    /// Update matching rows. Returns the affected row count.
    pub async fn update<I, K, V>(&self, values: I) -> DbResult<u64>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<QueryParam>,
    {
        self.check()?;
        let values = collect_values(values)?;
        let handle = self.write_handle().await?;
        let compiled = Grammar::new(handle.db_type()).compile_update(&self.state, &values)?;
        let outcome = handle.execute(&compiled.sql, &compiled.bindings).await?;
        info!(
            connection = %self.connection,
            table = %self.table_name(),
            rows_affected = outcome.rows_affected,
            "Rows updated"
        );
        self.db.invalidate_table(self.table_name()).await;
        Ok(outcome.rows_affected)
    }

    /// Delete matching rows. Returns the affected row count.
    pub async fn delete(&self) -> DbResult<u64> {
        self.check()?;
        let handle = self.write_handle().await?;
        let compiled = Grammar::new(handle.db_type()).compile_delete(&self.state)?;
        let outcome = handle.execute(&compiled.sql, &compiled.bindings).await?;
        info!(
            connection = %self.connection,
            table = %self.table_name(),
            rows_affected = outcome.rows_affected,
            "Rows deleted"
        );
        self.db.invalidate_table(self.table_name()).await;
        Ok(outcome.rows_affected)
    }

    // Collaborators

    /// Transaction control on this connection's WRITE handle.
    pub async fn transactions(&self) -> DbResult<TransactionCoordinator> {
        let handle = self.db.manager().get_connection(&self.connection, true).await?;
        Ok(TransactionCoordinator::new(handle))
    }

    pub fn pagination(&self) -> PaginationEngine<'_> {
        PaginationEngine::new(self)
    }

    pub async fn paginate(&self, page: u64, per_page: u64) -> DbResult<PaginationResult> {
        self.pagination().paginate(page, per_page).await
    }

    pub async fn simple_paginate(
        &self,
        page: u64,
        per_page: u64,
    ) -> DbResult<SimplePaginationResult> {
        self.pagination().simple_paginate(page, per_page).await
    }

    pub async fn cursor_paginate(
        &self,
        column: &str,
        cursor: Option<QueryParam>,
        per_page: u64,
        descending: bool,
    ) -> DbResult<CursorPaginationResult> {
        self.pagination()
            .cursor_paginate(column, cursor, per_page, descending)
            .await
    }

    pub async fn chunk<F>(&self, size: u64, callback: F) -> DbResult<bool>
    where
        F: FnMut(Vec<Row>) -> bool,
    {
        self.pagination().chunk(size, callback).await
    }

    // Internals shared with the pagination engine

    /// A copy for a derived statement. An explicit cache key gets `suffix`
    /// appended so derived results never overwrite the main one.
    pub(crate) fn derived(&self, suffix: &str) -> QueryBuilder {
        let mut copy = self.clone();
        if let Some(key) = copy.state.cache.as_mut().and_then(|c| c.key.as_mut()) {
            key.push(':');
            key.push_str(suffix);
        }
        copy
    }

    pub(crate) fn state_mut(&mut self) -> &mut QueryState {
        &mut self.state
    }

    pub(crate) fn check(&self) -> DbResult<()> {
        match &self.state.error {
            Some(message) => Err(DbError::invalid_input(message.clone())),
            None => Ok(()),
        }
    }

    /// READ handle, or the transaction's WRITE handle while one is open.
    async fn read_handle(&self) -> DbResult<Arc<ConnectionHandle>> {
        let manager = self.db.manager();
        let in_transaction = manager.in_transaction(&self.connection).await?;
        manager.get_connection(&self.connection, in_transaction).await
    }

    async fn write_handle(&self) -> DbResult<Arc<ConnectionHandle>> {
        self.db.manager().get_connection(&self.connection, true).await
    }

    /// Run a read, through the cache when a directive is set. Cached results
    /// carry the table tag of every table read, on top of the directive's tags. Results read
    /// inside a transaction are never cached.
    async fn fetch_rows(
        &self,
        handle: &ConnectionHandle,
        compiled: &CompiledQuery,
    ) -> DbResult<Vec<Row>> {
        let (Some(directive), Some(cache)) = (&self.state.cache, self.db.cache()) else {
            return handle.fetch_all(&compiled.sql, &compiled.bindings).await;
        };
        if handle.in_transaction() {
            debug!(
                connection = %self.connection,
                "Bypassing cache inside transaction"
            );
            return handle.fetch_all(&compiled.sql, &compiled.bindings).await;
        }

        let key = match &directive.key {
            Some(key) => key.clone(),
            None => statement_cache_key(self.table_name(), compiled),
        };
        self.db
            .register_table_tags(self.table_name(), &directive.tags)
            .await;
        let mut tags = directive.tags.clone();
        let joined = self
            .state
            .joins
            .iter()
            .filter_map(|join| join.table.split_whitespace().next());
        for table in std::iter::once(self.table_name()).chain(joined) {
            let table_tag = Database::table_tag(table);
            if !tags.contains(&table_tag) {
                tags.push(table_tag);
            }
        }
        cache
            .remember(&key, directive.ttl, &tags, || {
                handle.fetch_all(&compiled.sql, &compiled.bindings)
            })
            .await
    }

    fn finish_rows(&self, rows: Vec<Row>) -> DbResult<Vec<Row>> {
        match &self.state.anonymize {
            None => Ok(rows),
            Some(specs) => {
                let anonymizer = self.db.anonymizer();
                rows.into_iter()
                    .map(|row| anonymizer.anonymize(row, specs))
                    .collect()
            }
        }
    }

    fn push_where(
        mut self,
        connector: Connector,
        column: &str,
        operator: &str,
        value: QueryParam,
    ) -> Self {
        match parse_value_operator(operator, value) {
            Ok((operator, value)) => self.push_condition(connector, column, operator, value),
            Err(e) => {
                self.state.record_error(e.to_string());
                self
            }
        }
    }

    fn push_list<I, V>(self, connector: Connector, column: &str, operator: Operator, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<QueryParam>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.push_condition(connector, column, operator, ConditionValue::List(values))
    }

    pub(crate) fn push_condition(
        mut self,
        connector: Connector,
        column: &str,
        operator: Operator,
        value: ConditionValue,
    ) -> Self {
        if let Err(e) = validate_column(column) {
            self.state.record_error(e.to_string());
            return self;
        }
        if operator.shape() != value.shape() {
            self.state.record_error(format!(
                "Operator {} on '{}' expects a {:?} value",
                operator,
                column,
                operator.shape()
            ));
            return self;
        }
        self.state.wheres.push(Clause {
            connector,
            condition: Condition::Basic {
                column: column.to_string(),
                operator,
                value,
            },
        });
        self
    }

    fn push_group<F>(mut self, connector: Connector, build: F) -> Self
    where
        F: FnOnce(QueryBuilder) -> QueryBuilder,
    {
        let scratch = QueryBuilder {
            db: self.db.clone(),
            connection: self.connection.clone(),
            state: QueryState::new(self.state.table.clone()),
        };
        let built = build(scratch);
        if let Some(e) = built.state.error {
            self.state.record_error(e);
        } else if !built.state.wheres.is_empty() {
            self.state.wheres.push(Clause {
                connector,
                condition: Condition::Group(built.state.wheres),
            });
        }
        self
    }

    fn push_join(
        mut self,
        kind: JoinKind,
        table: &str,
        first: &str,
        operator: &str,
        second: &str,
    ) -> Self {
        let checked = validate_table(table)
            .and_then(|_| validate_column(first))
            .and_then(|_| validate_column(second))
            .and_then(|_| operator.parse::<Operator>());
        match checked {
            Ok(op) if op.is_comparison() => self.state.joins.push(Join {
                kind,
                table: table.trim().to_string(),
                first: first.to_string(),
                operator: op,
                second: second.to_string(),
            }),
            Ok(op) => self
                .state
                .record_error(format!("Operator {op} cannot join two columns")),
            Err(e) => self.state.record_error(e.to_string()),
        }
        self
    }

    fn push_order(mut self, column: &str, descending: bool) -> Self {
        match validate_column(column) {
            Ok(()) => self.state.orders.push(Order {
                column: column.to_string(),
                descending,
            }),
            Err(e) => self.state.record_error(e.to_string()),
        }
        self
    }
}

impl std::fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("connection", &self.connection)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

/// Parse an operator for a single-value call and fold NULL comparisons.
fn parse_value_operator(operator: &str, value: QueryParam) -> DbResult<(Operator, ConditionValue)> {
    let operator: Operator = operator.parse()?;
    match (operator, value) {
        (Operator::Eq, QueryParam::Null) => Ok((Operator::IsNull, ConditionValue::None)),
        (Operator::Ne, QueryParam::Null) => Ok((Operator::IsNotNull, ConditionValue::None)),
        (op, _) if op.shape() == ValueShape::None => Ok((op, ConditionValue::None)),
        (op, value) if op.shape() == ValueShape::Single => Ok((op, ConditionValue::Single(value))),
        (op, _) => Err(DbError::invalid_input(format!(
            "Operator {op} needs a {:?} value; use the dedicated where_* method",
            op.shape()
        ))),
    }
}

fn collect_values<I, K, V>(values: I) -> DbResult<BTreeMap<String, QueryParam>>
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<QueryParam>,
{
    let mut out = BTreeMap::new();
    for (column, value) in values {
        let column = column.into();
        validate_plain_column(&column)?;
        out.insert(column, value.into());
    }
    Ok(out)
}

/// `query:` + SHA-256 over table, SQL and bindings.
pub(crate) fn statement_cache_key(table: &str, compiled: &CompiledQuery) -> String {
    let bindings = serde_json::to_string(&compiled.bindings).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(table.as_bytes());
    hasher.update([0u8]);
    hasher.update(compiled.sql.as_bytes());
    hasher.update([0u8]);
    hasher.update(bindings.as_bytes());
    format!("query:{}", hex::encode(hasher.finalize()))
}

/// Read a COUNT result whatever numeric form the driver produced.
fn aggregate_to_u64(value: &JsonValue) -> DbResult<u64> {
    let parsed = match value {
        JsonValue::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        JsonValue::String(s) => s.trim().parse::<u64>().ok(),
        JsonValue::Null => Some(0),
        _ => None,
    };
    parsed.ok_or_else(|| DbError::internal(format!("Unexpected COUNT result: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_null_comparisons_fold_to_is_null() {
        assert_eq!(
            parse_value_operator("=", QueryParam::Null).unwrap(),
            (Operator::IsNull, ConditionValue::None)
        );
        assert_eq!(
            parse_value_operator("<>", QueryParam::Null).unwrap(),
            (Operator::IsNotNull, ConditionValue::None)
        );
        assert!(parse_value_operator("in", QueryParam::Int(1)).is_err());
    }

    #[test]
    fn test_statement_cache_key_is_deterministic() {
        let a = CompiledQuery {
            sql: "SELECT * FROM \"t\" WHERE \"id\" = ?".into(),
            bindings: vec![QueryParam::Int(1)],
        };
        let mut b = a.clone();
        assert_eq!(statement_cache_key("t", &a), statement_cache_key("t", &b));
        b.bindings = vec![QueryParam::Int(2)];
        assert_ne!(statement_cache_key("t", &a), statement_cache_key("t", &b));
        assert_ne!(statement_cache_key("t", &a), statement_cache_key("u", &a));
        assert!(statement_cache_key("t", &a).starts_with("query:"));
        assert_eq!(statement_cache_key("t", &a).len(), "query:".len() + 64);
    }

    #[test]
    fn test_aggregate_forms() {
        assert_eq!(aggregate_to_u64(&json!(12)).unwrap(), 12);
        assert_eq!(aggregate_to_u64(&json!("7")).unwrap(), 7);
        assert_eq!(aggregate_to_u64(&json!(3.0)).unwrap(), 3);
        assert_eq!(aggregate_to_u64(&JsonValue::Null).unwrap(), 0);
        assert!(aggregate_to_u64(&json!([1])).is_err());
    }

    #[test]
    fn test_collect_values_rejects_qualified_columns() {
        assert!(collect_values([("users.name", "x")]).is_err());
        let values = collect_values([("b", 2), ("a", 1)]).unwrap();
        assert_eq!(values.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}

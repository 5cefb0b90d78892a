//! SQL compilation for each supported dialect.
//!
//! Clause order is fixed (SELECT, FROM, JOIN, WHERE, GROUP BY, HAVING,
//! ORDER BY, LIMIT, OFFSET) so the same state always compiles to the same SQL.
//! Every value, LIMIT and OFFSET included, becomes a placeholder.

use super::identifier::{quote_column, quote_selectable, quote_table};
use super::state::{Clause, Condition, ConditionValue, Operator, QueryState};
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, QueryParam};
use std::collections::BTreeMap;

/// MySQL has no "no limit" keyword; this is the documented workaround.
const MYSQL_NO_LIMIT: &str = "18446744073709551615";

/// SQL text plus its bindings in placeholder order.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub bindings: Vec<QueryParam>,
}

/// Accumulates SQL and hands out placeholders.
struct SqlWriter {
    db: DatabaseType,
    sql: String,
    bindings: Vec<QueryParam>,
}

impl SqlWriter {
    fn new(db: DatabaseType) -> Self {
        Self {
            db,
            sql: String::new(),
            bindings: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn bind(&mut self, value: QueryParam) {
        self.bindings.push(value);
        match self.db {
            DatabaseType::PostgreSQL => {
                let n = self.bindings.len();
                self.sql.push_str(&format!("${n}"));
            }
            DatabaseType::MySQL | DatabaseType::SQLite => self.sql.push('?'),
        }
    }

    fn bind_list(&mut self, values: &[QueryParam]) {
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.bind(value.clone());
        }
    }

    fn finish(self) -> CompiledQuery {
        CompiledQuery {
            sql: self.sql,
            bindings: self.bindings,
        }
    }
}

/// Compiles [`QueryState`] for one dialect.
#[derive(Debug, Clone, Copy)]
pub struct Grammar {
    db: DatabaseType,
}

impl Grammar {
    pub fn new(db: DatabaseType) -> Self {
        Self { db }
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db
    }

    pub fn compile_select(&self, state: &QueryState) -> DbResult<CompiledQuery> {
        let mut w = SqlWriter::new(self.db);
        self.write_select_body(&mut w, state)?;
        self.write_orders(&mut w, state);
        self.write_limit_offset(&mut w, state.limit, state.offset);
        Ok(w.finish())
    }

    /// `COUNT(*)` under the current filters, ignoring ordering, limit and offset.
    /// Grouped queries are counted through a subquery so groups, not rows, are counted.
    pub fn compile_count(&self, state: &QueryState) -> DbResult<CompiledQuery> {
        let mut w = SqlWriter::new(self.db);
        if state.group_by.is_empty() {
            w.push("SELECT COUNT(*) AS aggregate FROM ");
            w.push(&quote_table(&state.table, self.db));
            self.write_joins(&mut w, state);
            self.write_wheres(&mut w, state)?;
        } else {
            w.push("SELECT COUNT(*) AS aggregate FROM (");
            self.write_select_body(&mut w, state)?;
            w.push(") AS aggregate_table");
        }
        Ok(w.finish())
    }

    /// `INSERT` with columns in sorted order. PostgreSQL returns the new key.
    pub fn compile_insert(
        &self,
        state: &QueryState,
        values: &BTreeMap<String, QueryParam>,
    ) -> DbResult<CompiledQuery> {
        if values.is_empty() {
            return Err(DbError::invalid_input("Insert requires at least one column"));
        }
        let mut w = SqlWriter::new(self.db);
        w.push("INSERT INTO ");
        w.push(&quote_table(state.base_table(), self.db));
        w.push(" (");
        let columns: Vec<String> = values.keys().map(|c| quote_column(c, self.db)).collect();
        w.push(&columns.join(", "));
        w.push(") VALUES (");
        let params: Vec<QueryParam> = values.values().cloned().collect();
        w.bind_list(&params);
        w.push(")");
        if self.db == DatabaseType::PostgreSQL {
            w.push(" RETURNING ");
            w.push(&quote_column(&state.primary_key, self.db));
        }
        Ok(w.finish())
    }

    pub fn compile_update(
        &self,
        state: &QueryState,
        values: &BTreeMap<String, QueryParam>,
    ) -> DbResult<CompiledQuery> {
        if values.is_empty() {
            return Err(DbError::invalid_input("Update requires at least one column"));
        }
        self.check_mutation(state, "UPDATE")?;
        let mut w = SqlWriter::new(self.db);
        w.push("UPDATE ");
        w.push(&quote_table(state.base_table(), self.db));
        w.push(" SET ");
        for (i, (column, value)) in values.iter().enumerate() {
            if i > 0 {
                w.push(", ");
            }
            w.push(&quote_column(column, self.db));
            w.push(" = ");
            w.bind(value.clone());
        }
        self.write_wheres(&mut w, state)?;
        Ok(w.finish())
    }

    pub fn compile_delete(&self, state: &QueryState) -> DbResult<CompiledQuery> {
        self.check_mutation(state, "DELETE")?;
        let mut w = SqlWriter::new(self.db);
        w.push("DELETE FROM ");
        w.push(&quote_table(state.base_table(), self.db));
        self.write_wheres(&mut w, state)?;
        Ok(w.finish())
    }

    fn check_mutation(&self, state: &QueryState, verb: &str) -> DbResult<()> {
        if !state.joins.is_empty() {
            return Err(DbError::invalid_input(format!("{verb} with JOIN is not supported")));
        }
        if state.limit.is_some() || state.offset.is_some() {
            return Err(DbError::invalid_input(format!(
                "{verb} with LIMIT/OFFSET is not supported"
            )));
        }
        Ok(())
    }

    /// Everything up to and including HAVING.
    fn write_select_body(&self, w: &mut SqlWriter, state: &QueryState) -> DbResult<()> {
        w.push("SELECT ");
        if state.columns.is_empty() {
            w.push("*");
        } else {
            let columns: Vec<String> = state
                .columns
                .iter()
                .map(|c| quote_selectable(c, self.db))
                .collect();
            w.push(&columns.join(", "));
        }
        w.push(" FROM ");
        w.push(&quote_table(&state.table, self.db));
        self.write_joins(w, state);
        self.write_wheres(w, state)?;

        if !state.group_by.is_empty() {
            let columns: Vec<String> = state
                .group_by
                .iter()
                .map(|c| quote_column(c, self.db))
                .collect();
            w.push(" GROUP BY ");
            w.push(&columns.join(", "));
        }
        if !state.havings.is_empty() {
            w.push(" HAVING ");
            self.write_clauses(w, &state.havings, true)?;
        }
        Ok(())
    }

    fn write_joins(&self, w: &mut SqlWriter, state: &QueryState) {
        for join in &state.joins {
            w.push(" ");
            w.push(join.kind.as_sql());
            w.push(" ");
            w.push(&quote_table(&join.table, self.db));
            w.push(" ON ");
            w.push(&quote_column(&join.first, self.db));
            w.push(" ");
            w.push(join.operator.as_sql());
            w.push(" ");
            w.push(&quote_column(&join.second, self.db));
        }
    }

    fn write_wheres(&self, w: &mut SqlWriter, state: &QueryState) -> DbResult<()> {
        if state.wheres.is_empty() {
            return Ok(());
        }
        w.push(" WHERE ");
        self.write_clauses(w, &state.wheres, false)
    }

    fn write_clauses(&self, w: &mut SqlWriter, clauses: &[Clause], having: bool) -> DbResult<()> {
        for (i, clause) in clauses.iter().enumerate() {
            if i > 0 {
                w.push(" ");
                w.push(clause.connector.as_sql());
                w.push(" ");
            }
            match &clause.condition {
                Condition::Group(inner) => {
                    w.push("(");
                    self.write_clauses(w, inner, having)?;
                    w.push(")");
                }
                Condition::Basic {
                    column,
                    operator,
                    value,
                } => {
                    let target = if having {
                        quote_selectable(column, self.db)
                    } else {
                        quote_column(column, self.db)
                    };
                    self.write_condition(w, &target, *operator, value)?;
                }
            }
        }
        Ok(())
    }

    fn write_condition(
        &self,
        w: &mut SqlWriter,
        target: &str,
        operator: Operator,
        value: &ConditionValue,
    ) -> DbResult<()> {
        match (operator, value) {
            // An empty IN matches nothing and an empty NOT IN matches everything.
            (Operator::In, ConditionValue::List(values)) if values.is_empty() => w.push("1 = 0"),
            (Operator::NotIn, ConditionValue::List(values)) if values.is_empty() => w.push("1 = 1"),
            (Operator::In | Operator::NotIn, ConditionValue::List(values)) => {
                w.push(target);
                w.push(" ");
                w.push(operator.as_sql());
                w.push(" (");
                w.bind_list(values);
                w.push(")");
            }
            (Operator::Between | Operator::NotBetween, ConditionValue::Pair(low, high)) => {
                w.push(target);
                w.push(" ");
                w.push(operator.as_sql());
                w.push(" ");
                w.bind(low.clone());
                w.push(" AND ");
                w.bind(high.clone());
            }
            (Operator::IsNull | Operator::IsNotNull, ConditionValue::None) => {
                w.push(target);
                w.push(" ");
                w.push(operator.as_sql());
            }
            (op, ConditionValue::Single(v)) if op.shape() == value.shape() => {
                w.push(target);
                w.push(" ");
                w.push(op.as_sql());
                w.push(" ");
                w.bind(v.clone());
            }
            _ => {
                return Err(DbError::invalid_input(format!(
                    "Operator {} expects a {:?} value, got {:?}",
                    operator,
                    operator.shape(),
                    value.shape()
                )));
            }
        }
        Ok(())
    }

    fn write_orders(&self, w: &mut SqlWriter, state: &QueryState) {
        if state.orders.is_empty() {
            return;
        }
        let orders: Vec<String> = state
            .orders
            .iter()
            .map(|o| {
                let dir = if o.descending { "DESC" } else { "ASC" };
                format!("{} {}", quote_column(&o.column, self.db), dir)
            })
            .collect();
        w.push(" ORDER BY ");
        w.push(&orders.join(", "));
    }

    fn write_limit_offset(&self, w: &mut SqlWriter, limit: Option<u64>, offset: Option<u64>) {
        match (limit, offset) {
            (Some(limit), _) => {
                w.push(" LIMIT ");
                w.bind(QueryParam::Int(clamp_i64(limit)));
            }
            (None, Some(_)) => match self.db {
                DatabaseType::SQLite => w.push(" LIMIT -1"),
                DatabaseType::MySQL => {
                    w.push(" LIMIT ");
                    w.push(MYSQL_NO_LIMIT);
                }
                DatabaseType::PostgreSQL => {}
            },
            (None, None) => {}
        }
        if let Some(offset) = offset {
            w.push(" OFFSET ");
            w.bind(QueryParam::Int(clamp_i64(offset)));
        }
    }
}

fn clamp_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

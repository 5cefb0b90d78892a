//! The query description a builder accumulates before compilation.

use crate::anonymize::FieldSpecs;
use crate::error::DbError;
use crate::models::QueryParam;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Comparison operators accepted in WHERE, HAVING and JOIN conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Like,
    NotLike,
    In,
    NotIn,
    Between,
    NotBetween,
    IsNull,
    IsNotNull,
}

/// The value shape an operator needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueShape {
    Single,
    List,
    Pair,
    None,
}

impl Operator {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "<>",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
            Self::Like => "LIKE",
            Self::NotLike => "NOT LIKE",
            Self::In => "IN",
            Self::NotIn => "NOT IN",
            Self::Between => "BETWEEN",
            Self::NotBetween => "NOT BETWEEN",
            Self::IsNull => "IS NULL",
            Self::IsNotNull => "IS NOT NULL",
        }
    }

    pub fn shape(&self) -> ValueShape {
        match self {
            Self::In | Self::NotIn => ValueShape::List,
            Self::Between | Self::NotBetween => ValueShape::Pair,
            Self::IsNull | Self::IsNotNull => ValueShape::None,
            _ => ValueShape::Single,
        }
    }

    /// Plain comparisons, the only operators allowed between two columns.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Self::Eq | Self::Ne | Self::Lt | Self::Le | Self::Gt | Self::Ge
        )
    }
}

impl FromStr for Operator {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.split_whitespace().collect::<Vec<_>>().join(" ");
        match normalized.to_ascii_uppercase().as_str() {
            "=" | "==" => Ok(Self::Eq),
            "!=" | "<>" => Ok(Self::Ne),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Le),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Ge),
            "LIKE" => Ok(Self::Like),
            "NOT LIKE" => Ok(Self::NotLike),
            "IN" => Ok(Self::In),
            "NOT IN" => Ok(Self::NotIn),
            "BETWEEN" => Ok(Self::Between),
            "NOT BETWEEN" => Ok(Self::NotBetween),
            "IS NULL" => Ok(Self::IsNull),
            "IS NOT NULL" => Ok(Self::IsNotNull),
            _ => Err(DbError::invalid_input(format!("Unsupported operator: {s:?}"))),
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

/// Right-hand side of a condition.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionValue {
    None,
    Single(QueryParam),
    List(Vec<QueryParam>),
    Pair(QueryParam, QueryParam),
}

impl ConditionValue {
    pub fn shape(&self) -> ValueShape {
        match self {
            Self::None => ValueShape::None,
            Self::Single(_) => ValueShape::Single,
            Self::List(_) => ValueShape::List,
            Self::Pair(..) => ValueShape::Pair,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connector {
    And,
    Or,
}

impl Connector {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::And => "AND",
            Self::Or => "OR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Basic {
        column: String,
        operator: Operator,
        value: ConditionValue,
    },
    /// A parenthesized sub-list built by a closure.
    Group(Vec<Clause>),
}

/// One entry of a WHERE or HAVING list. The first entry's connector is ignored.
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub connector: Connector,
    pub condition: Condition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl JoinKind {
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::Inner => "INNER JOIN",
            Self::Left => "LEFT JOIN",
        }
    }
}

/// `kind JOIN table ON first operator second`, both sides being columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub kind: JoinKind,
    pub table: String,
    pub first: String,
    pub operator: Operator,
    pub second: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    pub column: String,
    pub descending: bool,
}

/// Result caching requested for a read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CacheDirective {
    /// Explicit key; derived from the compiled statement when absent.
    pub key: Option<String>,
    /// `None` falls back to the cache's default TTL.
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryState {
    pub table: String,
    pub columns: Vec<String>,
    pub wheres: Vec<Clause>,
    pub joins: Vec<Join>,
    pub group_by: Vec<String>,
    pub havings: Vec<Clause>,
    pub orders: Vec<Order>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Column PostgreSQL inserts return the new id from.
    pub primary_key: String,
    pub cache: Option<CacheDirective>,
    pub anonymize: Option<FieldSpecs>,
    /// First building mistake; reported when the query executes.
    pub error: Option<String>,
}

impl QueryState {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            columns: Vec::new(),
            wheres: Vec::new(),
            joins: Vec::new(),
            group_by: Vec::new(),
            havings: Vec::new(),
            orders: Vec::new(),
            limit: None,
            offset: None,
            primary_key: "id".to_string(),
            cache: None,
            anonymize: None,
            error: None,
        }
    }

    /// Keep the first error; later ones are usually consequences of it.
    pub fn record_error(&mut self, message: impl Into<String>) {
        if self.error.is_none() {
            self.error = Some(message.into());
        }
    }

    /// Table name without its alias.
    pub fn base_table(&self) -> &str {
        self.table.split_whitespace().next().unwrap_or(&self.table)
    }

    pub fn cache_mut(&mut self) -> &mut CacheDirective {
        self.cache.get_or_insert_with(CacheDirective::default)
    }
}

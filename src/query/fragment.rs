//! SQL fragment tree
//!
//! Composed statements are built as a small tree (statement → CTEs → selects
//! → joins / predicates / projections) and turned into text by one renderer.
//! Nothing outside this module concatenates SQL.

use std::fmt::{self, Write};

/// `WITH <ctes> <body>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub ctes: Vec<Cte>,
    pub body: Select,
}

/// Named intermediate result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cte {
    pub name: String,
    pub query: Select,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Distinct {
    #[default]
    None,
    All,
    On(Vec<String>),
}

/// One projected expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Projection {
    Wildcard,
    Expr { expr: String, alias: Option<String> },
}

impl Projection {
    pub fn expr(expr: impl Into<String>) -> Self {
        Projection::Expr {
            expr: expr.into(),
            alias: None,
        }
    }

    pub fn aliased(expr: impl Into<String>, alias: impl Into<String>) -> Self {
        Projection::Expr {
            expr: expr.into(),
            alias: Some(alias.into()),
        }
    }
}

/// Already parameterized boolean expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Predicate(pub String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinTarget {
    Relation(String),
    Subquery { query: Box<Select>, alias: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinConstraint {
    On(String),
    Using(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    pub kind: JoinKind,
    pub target: JoinTarget,
    pub constraint: JoinConstraint,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Select {
    pub distinct: Distinct,
    pub projection: Vec<Projection>,
    pub from: String,
    pub joins: Vec<Join>,
    pub filter: Option<Predicate>,
    pub group_by: Vec<String>,
    pub order_by: Vec<String>,
    pub limit: Option<u64>,
}

impl Select {
    /// `SELECT <projection> FROM <from>`
    pub fn from(from: impl Into<String>, projection: Vec<Projection>) -> Self {
        Self {
            from: from.into(),
            projection,
            ..Self::default()
        }
    }
}

/// Render a statement to text with single-space separators.
pub fn render(statement: &Statement) -> String {
    normalize_whitespace(&statement.to_string())
}

/// Collapse whitespace runs to one space and trim the ends.
pub fn normalize_whitespace(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.ctes.is_empty() {
            f.write_str("WITH ")?;
            for (i, cte) in self.ctes.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{} AS ({})", cte.name, cte.query)?;
            }
            f.write_char(' ')?;
        }
        write!(f, "{}", self.body)
    }
}

impl fmt::Display for Select {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SELECT ")?;
        match &self.distinct {
            Distinct::None => {}
            Distinct::All => f.write_str("DISTINCT ")?,
            Distinct::On(keys) => write!(f, "DISTINCT ON ({}) ", keys.join(", "))?,
        }

        for (i, projection) in self.projection.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{projection}")?;
        }

        write!(f, " FROM {}", self.from)?;

        for join in &self.joins {
            write!(f, " {join}")?;
        }
        if let Some(Predicate(predicate)) = &self.filter {
            write!(f, " WHERE {predicate}")?;
        }
        if !self.group_by.is_empty() {
            write!(f, " GROUP BY {}", self.group_by.join(", "))?;
        }
        if !self.order_by.is_empty() {
            write!(f, " ORDER BY {}", self.order_by.join(", "))?;
        }
        if let Some(limit) = self.limit {
            write!(f, " LIMIT {limit}")?;
        }
        Ok(())
    }
}

impl fmt::Display for Projection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Projection::Wildcard => f.write_char('*'),
            Projection::Expr { expr, alias: None } => f.write_str(expr),
            Projection::Expr {
                expr,
                alias: Some(alias),
            } => write!(f, "{expr} AS {alias}"),
        }
    }
}

impl fmt::Display for Join {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            JoinKind::Inner => f.write_str("JOIN ")?,
            JoinKind::Left => f.write_str("LEFT JOIN ")?,
        }
        match &self.target {
            JoinTarget::Relation(name) => f.write_str(name)?,
            JoinTarget::Subquery { query, alias } => write!(f, "({query}) AS {alias}")?,
        }
        match &self.constraint {
            JoinConstraint::On(condition) => write!(f, " ON {condition}"),
            JoinConstraint::Using(columns) => write!(f, " USING ({})", columns.join(", ")),
        }
    }
}

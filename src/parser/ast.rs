use crate::core::{DataType, Value};

/// Top-level parse result. DDL/DML/TCL/maintenance statements are flat
/// variants; `Select` carries the whole SELECT pipeline in one struct since
/// every clause (joins, WHERE, GROUP BY, HAVING, ORDER BY) can itself
/// contain a nested `SelectStatement` via a subquery `Expr`.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    CreateTable {
        name: String,
        if_not_exists: bool,
        columns: Vec<ColumnDef>,
    },
    DropTable {
        name: String,
        if_exists: bool,
    },
    CreateIndex {
        name: String,
        table: String,
        column: String,
    },
    DropIndex {
        name: String,
    },
    AlterTable {
        table: String,
        op: AlterTableOp,
    },
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        values: Vec<Value>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Value)>,
        filter: Option<Expr>,
    },
    Delete {
        table: String,
        filter: Option<Expr>,
    },
    Select(SelectStatement),
    Begin,
    Commit,
    Rollback,
    Vacuum {
        table: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub embedding_dim: Option<u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AlterTableOp {
    AddColumn(ColumnDef),
    DropColumn(String),
    RenameColumn(String, String),
    RenameTable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectStatement {
    pub columns: Vec<SelectItem>,
    pub from: String,
    pub joins: Vec<JoinClause>,
    pub filter: Option<Expr>,
    pub group_by: Vec<String>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SelectItem {
    Star,
    Expr { expr: Expr, alias: Option<String> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq)]
pub struct JoinClause {
    pub join_type: JoinType,
    pub table: String,
    pub on: Expr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OrderItem {
    Column(String, SortDir),
    /// `ORDER BY SIMILARITY TO '<text>' [ON <column>]` — resolved against the
    /// ANN index at execution time; `dimension_column` pins which embedding
    /// column to search when a table has more than one.
    Similarity {
        literal: String,
        dimension_column: Option<String>,
    },
    /// Documented non-contractual shuffle, open question.
    Vibes,
}

/// Shared expression tree for WHERE/HAVING/ON, including the uncorrelated
/// subquery forms calls out. `SelectStatement` is defined in
/// this same module so `Expr` can recurse into a nested SELECT without a
/// cross-module cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Column(String),
    Literal(Value),
    Aggregate(AggregateCall),
    Not(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Compare(Box<Expr>, CompareOp, Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    Like(Box<Expr>, String),
    InSubquery {
        expr: Box<Expr>,
        subquery: Box<SelectStatement>,
        negated: bool,
    },
    Exists {
        subquery: Box<SelectStatement>,
        negated: bool,
    },
    ScalarSubquery(Box<SelectStatement>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunc {
    pub fn name(self) -> &'static str {
        match self {
            AggregateFunc::Count => "COUNT",
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Avg => "AVG",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateArg {
    Star,
    Column(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateCall {
    pub func: AggregateFunc,
    pub arg: AggregateArg,
}

impl AggregateCall {
    /// The synthesized identifier (`COUNT(*)`, `SUM(price)`, ...) the row
    /// produced by a GROUP BY/aggregate pipeline exposes this value under.
    pub fn synthesized_name(&self) -> String {
        match &self.arg {
            AggregateArg::Star => format!("{}(*)", self.func.name()),
            AggregateArg::Column(c) => format!("{}({c})", self.func.name()),
        }
    }
}

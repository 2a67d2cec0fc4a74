//! Recursive-descent SQL parser built on `nom`, split one module per
//! statement family with `common.rs` for shared lexical rules, built
//! around this crate's own grammar and AST (`ast.rs`).

pub mod ast;
mod common;
mod ddl;
mod dml;
mod dql;

use nom::branch::alt;

use crate::core::{DatabaseError, DbResult};
pub use ast::{
    AggregateArg, AggregateCall, AggregateFunc, AlterTableOp, ColumnDef, CompareOp, Expr,
    JoinClause, JoinType, OrderItem, SelectItem, SelectStatement, SortDir, Statement,
};

/// Parses a single SQL statement (an optional trailing `;` is accepted and
/// stripped). Returns `InvalidSyntax` on any parse failure or trailing
/// garbage.
pub fn parse_statement(input: &str) -> DbResult<Statement> {
    let trimmed = input.trim();
    let trimmed = trimmed.strip_suffix(';').unwrap_or(trimmed).trim();
    if trimmed.is_empty() {
        return Err(DatabaseError::InvalidSyntax("empty statement".to_string()));
    }

    let result = alt((
        dml::transaction_control,
        ddl::create_table,
        ddl::drop_table,
        ddl::create_index,
        ddl::drop_index,
        ddl::alter_table,
        ddl::vacuum,
        dml::insert,
        dml::update,
        dml::delete,
        nom::combinator::map(dql::select, Statement::Select),
    ))(trimmed);

    match result {
        Ok((rest, stmt)) if rest.trim().is_empty() => Ok(stmt),
        Ok((rest, _)) => Err(DatabaseError::InvalidSyntax(format!(
            "unexpected trailing input: {rest}"
        ))),
        Err(e) => Err(DatabaseError::InvalidSyntax(format!("{e}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_table_with_embedding() {
        let stmt = parse_statement(
            "CREATE TABLE docs (id int, body text, emb embedding(128))",
        )
        .unwrap();
        match stmt {
            Statement::CreateTable { name, columns, .. } => {
                assert_eq!(name, "docs");
                assert_eq!(columns.len(), 3);
                assert_eq!(columns[2].embedding_dim, Some(128));
            }
            _ => panic!("wrong statement kind"),
        }
    }

    #[test]
    fn parses_insert() {
        let stmt = parse_statement("INSERT INTO u VALUES (1, 'hi', true)").unwrap();
        assert!(matches!(stmt, Statement::Insert { .. }));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse_statement("SELECT * FROM t WHERE a = 1 ZZZZ").is_err());
    }

    #[test]
    fn parses_begin_commit_rollback() {
        assert!(matches!(parse_statement("BEGIN").unwrap(), Statement::Begin));
        assert!(matches!(parse_statement("COMMIT").unwrap(), Statement::Commit));
        assert!(matches!(
            parse_statement("ROLLBACK").unwrap(),
            Statement::Rollback
        ));
    }
}

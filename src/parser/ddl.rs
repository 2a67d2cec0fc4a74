use nom::branch::alt;
use nom::character::complete::{char, digit1};
use nom::combinator::{map, map_res, opt};
use nom::multi::separated_list1;
use nom::sequence::{delimited, preceded, tuple};
use nom::IResult;

use super::ast::{AlterTableOp, ColumnDef, Statement};
use super::common::{data_type, identifier, keyword, ws};
use crate::core::DataType;

fn embedding_dim(input: &str) -> IResult<&str, u32> {
    delimited(ws(char('(')), map_res(digit1, str::parse::<u32>), ws(char(')')))(input)
}

fn column_def(input: &str) -> IResult<&str, ColumnDef> {
    map(
        tuple((identifier, data_type, opt(embedding_dim))),
        |(name, data_type, dim)| ColumnDef {
            name,
            data_type,
            embedding_dim: if data_type == DataType::Embedding { dim } else { None },
        },
    )(input)
}

pub fn create_table(input: &str) -> IResult<&str, Statement> {
    map(
        tuple((
            keyword("CREATE"),
            keyword("TABLE"),
            opt(tuple((keyword("IF"), keyword("NOT"), keyword("EXISTS")))),
            identifier,
            ws(char('(')),
            separated_list1(ws(char(',')), column_def),
            ws(char(')')),
        )),
        |(_, _, if_not_exists, name, _, columns, _)| Statement::CreateTable {
            name,
            if_not_exists: if_not_exists.is_some(),
            columns,
        },
    )(input)
}

pub fn drop_table(input: &str) -> IResult<&str, Statement> {
    map(
        tuple((
            keyword("DROP"),
            keyword("TABLE"),
            opt(tuple((keyword("IF"), keyword("EXISTS")))),
            identifier,
        )),
        |(_, _, if_exists, name)| Statement::DropTable {
            name,
            if_exists: if_exists.is_some(),
        },
    )(input)
}

pub fn create_index(input: &str) -> IResult<&str, Statement> {
    map(
        tuple((
            keyword("CREATE"),
            keyword("INDEX"),
            identifier,
            keyword("ON"),
            identifier,
            ws(char('(')),
            identifier,
            ws(char(')')),
        )),
        |(_, _, name, _, table, _, column, _)| Statement::CreateIndex { name, table, column },
    )(input)
}

pub fn drop_index(input: &str) -> IResult<&str, Statement> {
    map(
        tuple((keyword("DROP"), keyword("INDEX"), identifier)),
        |(_, _, name)| Statement::DropIndex { name },
    )(input)
}

fn alter_add_column(input: &str) -> IResult<&str, AlterTableOp> {
    map(
        preceded(tuple((keyword("ADD"), keyword("COLUMN"))), column_def),
        AlterTableOp::AddColumn,
    )(input)
}

fn alter_drop_column(input: &str) -> IResult<&str, AlterTableOp> {
    map(
        preceded(tuple((keyword("DROP"), keyword("COLUMN"))), identifier),
        AlterTableOp::DropColumn,
    )(input)
}

fn alter_rename_column(input: &str) -> IResult<&str, AlterTableOp> {
    map(
        preceded(
            tuple((keyword("RENAME"), keyword("COLUMN"))),
            tuple((identifier, keyword("TO"), identifier)),
        ),
        |(old, _, new)| AlterTableOp::RenameColumn(old, new),
    )(input)
}

fn alter_rename_table(input: &str) -> IResult<&str, AlterTableOp> {
    map(
        preceded(tuple((keyword("RENAME"), keyword("TO"))), identifier),
        AlterTableOp::RenameTable,
    )(input)
}

pub fn alter_table(input: &str) -> IResult<&str, Statement> {
    map(
        tuple((
            keyword("ALTER"),
            keyword("TABLE"),
            identifier,
            alt((
                alter_add_column,
                alter_drop_column,
                alter_rename_column,
                alter_rename_table,
            )),
        )),
        |(_, _, table, op)| Statement::AlterTable { table, op },
    )(input)
}

pub fn vacuum(input: &str) -> IResult<&str, Statement> {
    map(
        tuple((keyword("VACUUM"), opt(identifier))),
        |(_, table)| Statement::Vacuum { table },
    )(input)
}

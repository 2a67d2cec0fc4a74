use nom::branch::alt;
use nom::character::complete::char;
use nom::combinator::{map, opt};
use nom::multi::separated_list1;
use nom::sequence::{delimited, preceded, tuple};
use nom::IResult;

use super::ast::Statement;
use super::common::{identifier, keyword, value, ws};
use super::dql::expr;

fn column_list(input: &str) -> IResult<&str, Vec<String>> {
    delimited(
        ws(char('(')),
        separated_list1(ws(char(',')), identifier),
        ws(char(')')),
    )(input)
}

pub fn insert(input: &str) -> IResult<&str, Statement> {
    map(
        tuple((
            keyword("INSERT"),
            keyword("INTO"),
            identifier,
            opt(column_list),
            keyword("VALUES"),
            ws(char('(')),
            separated_list1(ws(char(',')), value),
            ws(char(')')),
        )),
        |(_, _, table, columns, _, _, values, _)| Statement::Insert {
            table,
            columns,
            values,
        },
    )(input)
}

fn assignment(input: &str) -> IResult<&str, (String, crate::core::Value)> {
    map(
        tuple((identifier, ws(char('=')), value)),
        |(col, _, val)| (col, val),
    )(input)
}

pub fn update(input: &str) -> IResult<&str, Statement> {
    map(
        tuple((
            keyword("UPDATE"),
            identifier,
            keyword("SET"),
            separated_list1(ws(char(',')), assignment),
            opt(preceded(keyword("WHERE"), expr)),
        )),
        |(_, table, _, assignments, filter)| Statement::Update {
            table,
            assignments,
            filter,
        },
    )(input)
}

pub fn delete(input: &str) -> IResult<&str, Statement> {
    map(
        tuple((
            keyword("DELETE"),
            keyword("FROM"),
            identifier,
            opt(preceded(keyword("WHERE"), expr)),
        )),
        |(_, _, table, filter)| Statement::Delete { table, filter },
    )(input)
}

pub fn transaction_control(input: &str) -> IResult<&str, Statement> {
    alt((
        map(keyword("BEGIN"), |_| Statement::Begin),
        map(keyword("COMMIT"), |_| Statement::Commit),
        map(keyword("ROLLBACK"), |_| Statement::Rollback),
    ))(input)
}

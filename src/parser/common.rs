use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case, take_while, take_while1};
use nom::character::complete::{alpha1, char, digit1, multispace0};
use nom::combinator::{map, map_res, opt, recognize};
use nom::multi::separated_list0;
use nom::sequence::{delimited, pair, tuple};
use nom::IResult;

use crate::core::{DataType, Value};

pub fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> IResult<&'a str, O>
where
    F: FnMut(&'a str) -> IResult<&'a str, O>,
{
    delimited(multispace0, inner, multispace0)
}

/// Bare identifier: `[A-Za-z_][A-Za-z0-9_]*`. Identifiers are case-sensitive
///; only keywords are matched case-insensitively.
pub fn identifier(input: &str) -> IResult<&str, String> {
    map(
        recognize(pair(
            alt((alpha1, tag("_"))),
            take_while(|c: char| c.is_alphanumeric() || c == '_'),
        )),
        std::string::ToString::to_string,
    )(input)
}

/// `table.column` or a bare `column`, returned as the caller receives it
/// (qualification is resolved later against the active tuple schema).
pub fn qualified_identifier(input: &str) -> IResult<&str, String> {
    map(
        recognize(tuple((identifier, opt(pair(char('.'), identifier))))),
        std::string::ToString::to_string,
    )(input)
}

pub fn data_type(input: &str) -> IResult<&str, DataType> {
    alt((
        map(tag_no_case("INT"), |_| DataType::Int),
        map(tag_no_case("INTEGER"), |_| DataType::Int),
        map(tag_no_case("FLOAT"), |_| DataType::Float),
        map(tag_no_case("DOUBLE"), |_| DataType::Float),
        map(tag_no_case("TEXT"), |_| DataType::Text),
        map(tag_no_case("VARCHAR"), |_| DataType::Text),
        map(tag_no_case("BOOL"), |_| DataType::Bool),
        map(tag_no_case("BOOLEAN"), |_| DataType::Bool),
        map(tag_no_case("EMBEDDING"), |_| DataType::Embedding),
    ))(input)
}

pub fn string_literal(input: &str) -> IResult<&str, String> {
    alt((
        map(
            delimited(char('"'), take_while(|c| c != '"'), char('"')),
            std::string::ToString::to_string,
        ),
        map(
            delimited(char('\''), take_while(|c| c != '\''), char('\'')),
            std::string::ToString::to_string,
        ),
    ))(input)
}

fn signed_number(input: &str) -> IResult<&str, &str> {
    recognize(pair(opt(char('-')), digit1))(input)
}

fn float_literal(input: &str) -> IResult<&str, f64> {
    map_res(
        recognize(tuple((opt(char('-')), digit1, char('.'), digit1))),
        str::parse::<f64>,
    )(input)
}

fn embedding_literal(input: &str) -> IResult<&str, Vec<f32>> {
    delimited(
        ws(char('[')),
        separated_list0(
            ws(char(',')),
            alt((
                map_res(float_literal, |f| Ok::<f32, std::num::ParseFloatError>(f as f32)),
                map_res(signed_number, str::parse::<f32>),
            )),
        ),
        ws(char(']')),
    )(input)
}

/// A literal value: `NULL`, `TRUE`/`FALSE`, a quoted string, a number, or an
/// embedding bracket literal `[0.1, 0.2, ...]`. The latter is a dedicated
/// vector literal, not a general SQL array type.
pub fn value(input: &str) -> IResult<&str, Value> {
    alt((
        map(tag_no_case("NULL"), |_| Value::Null),
        map(tag_no_case("TRUE"), |_| Value::Bool(true)),
        map(tag_no_case("FALSE"), |_| Value::Bool(false)),
        map(embedding_literal, Value::Embedding),
        map(string_literal, Value::Text),
        map(float_literal, Value::Float),
        map_res(signed_number, |s: &str| s.parse::<i64>().map(Value::Int)),
    ))(input)
}

pub fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    ws(tag_no_case(kw))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_embedding_literal() {
        let (_, v) = value("[1.0, 2.5, -3.0]").unwrap();
        assert_eq!(v, Value::Embedding(vec![1.0, 2.5, -3.0]));
    }

    #[test]
    fn parses_negative_int() {
        let (_, v) = value("-42").unwrap();
        assert_eq!(v, Value::Int(-42));
    }

    #[test]
    fn qualified_identifier_keeps_dot() {
        let (_, s) = qualified_identifier("orders.id").unwrap();
        assert_eq!(s, "orders.id");
    }
}

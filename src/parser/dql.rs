use nom::branch::alt;
use nom::bytes::complete::tag_no_case;
use nom::character::complete::{char, digit1};
use nom::combinator::{map, map_res, opt};
use nom::multi::separated_list1;
use nom::sequence::{delimited, preceded, tuple};
use nom::IResult;

use crate::core::Value;

use super::ast::{
    AggregateArg, AggregateCall, AggregateFunc, CompareOp, Expr, JoinClause, JoinType, OrderItem,
    SelectItem, SelectStatement, SortDir,
};
use super::common::{identifier, keyword, qualified_identifier, string_literal, value, ws};

fn subquery(input: &str) -> IResult<&str, Box<SelectStatement>> {
    map(delimited(ws(char('(')), select, ws(char(')'))), Box::new)(input)
}

fn aggregate_func_name(input: &str) -> IResult<&str, AggregateFunc> {
    alt((
        map(tag_no_case("COUNT"), |_| AggregateFunc::Count),
        map(tag_no_case("SUM"), |_| AggregateFunc::Sum),
        map(tag_no_case("AVG"), |_| AggregateFunc::Avg),
        map(tag_no_case("MIN"), |_| AggregateFunc::Min),
        map(tag_no_case("MAX"), |_| AggregateFunc::Max),
    ))(input)
}

fn aggregate_call(input: &str) -> IResult<&str, AggregateCall> {
    map(
        tuple((
            aggregate_func_name,
            ws(char('(')),
            alt((
                map(char('*'), |_| AggregateArg::Star),
                map(qualified_identifier, AggregateArg::Column),
            )),
            ws(char(')')),
        )),
        |(func, _, arg, _)| AggregateCall { func, arg },
    )(input)
}

fn primary_expr(input: &str) -> IResult<&str, Expr> {
    alt((
        map(aggregate_call, Expr::Aggregate),
        map(value, Expr::Literal),
        map(qualified_identifier, Expr::Column),
    ))(input)
}

fn compare_op(input: &str) -> IResult<&str, CompareOp> {
    alt((
        map(tag_no_case(">="), |_| CompareOp::Ge),
        map(tag_no_case("<="), |_| CompareOp::Le),
        map(tag_no_case("!="), |_| CompareOp::Ne),
        map(tag_no_case("<>"), |_| CompareOp::Ne),
        map(tag_no_case("="), |_| CompareOp::Eq),
        map(tag_no_case(">"), |_| CompareOp::Gt),
        map(tag_no_case("<"), |_| CompareOp::Lt),
    ))(input)
}

/// One non-AND/OR condition term: `EXISTS`/`IN`/`IS [NOT] NULL`/`LIKE`/a
/// comparison (scalar, column-to-column, or against a scalar subquery), or
/// a parenthesized sub-expression.
fn condition_term(input: &str) -> IResult<&str, Expr> {
    alt((
        map(
            preceded(tuple((keyword("NOT"), keyword("EXISTS"))), subquery),
            |sq| Expr::Exists {
                subquery: sq,
                negated: true,
            },
        ),
        map(preceded(keyword("EXISTS"), subquery), |sq| Expr::Exists {
            subquery: sq,
            negated: false,
        }),
        map(
            tuple((
                qualified_identifier,
                keyword("NOT"),
                keyword("IN"),
                subquery,
            )),
            |(col, _, _, sq)| Expr::InSubquery {
                expr: Box::new(Expr::Column(col)),
                subquery: sq,
                negated: true,
            },
        ),
        map(
            tuple((qualified_identifier, keyword("IN"), subquery)),
            |(col, _, sq)| Expr::InSubquery {
                expr: Box::new(Expr::Column(col)),
                subquery: sq,
                negated: false,
            },
        ),
        map(
            tuple((qualified_identifier, keyword("IS"), keyword("NOT"), keyword("NULL"))),
            |(col, _, _, _)| Expr::IsNotNull(Box::new(Expr::Column(col))),
        ),
        map(
            tuple((qualified_identifier, keyword("IS"), keyword("NULL"))),
            |(col, _, _)| Expr::IsNull(Box::new(Expr::Column(col))),
        ),
        map(
            tuple((qualified_identifier, keyword("LIKE"), string_literal)),
            |(col, _, pattern)| Expr::Like(Box::new(Expr::Column(col)), pattern),
        ),
        map(
            tuple((primary_expr, ws(compare_op), subquery)),
            |(lhs, op, sq)| {
                Expr::Compare(
                    Box::new(lhs),
                    op,
                    Box::new(Expr::ScalarSubquery(sq)),
                )
            },
        ),
        map(
            tuple((primary_expr, ws(compare_op), primary_expr)),
            |(lhs, op, rhs)| Expr::Compare(Box::new(lhs), op, Box::new(rhs)),
        ),
        map(
            delimited(ws(char('(')), condition_or, ws(char(')'))),
            |e| e,
        ),
        map(preceded(keyword("NOT"), condition_term), |e| {
            Expr::Not(Box::new(e))
        }),
    ))(input)
}

fn condition_and(input: &str) -> IResult<&str, Expr> {
    let (input, first) = condition_term(input)?;
    let (input, rest) = nom::multi::many0(preceded(keyword("AND"), condition_term))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, next| Expr::And(Box::new(acc), Box::new(next))),
    ))
}

pub fn condition_or(input: &str) -> IResult<&str, Expr> {
    let (input, first) = condition_and(input)?;
    let (input, rest) = nom::multi::many0(preceded(keyword("OR"), condition_and))(input)?;
    Ok((
        input,
        rest.into_iter()
            .fold(first, |acc, next| Expr::Or(Box::new(acc), Box::new(next))),
    ))
}

pub fn expr(input: &str) -> IResult<&str, Expr> {
    condition_or(input)
}

fn select_item(input: &str) -> IResult<&str, SelectItem> {
    alt((
        map(char('*'), |_| SelectItem::Star),
        map(
            tuple((
                expr,
                opt(preceded(keyword("AS"), identifier)),
            )),
            |(e, alias)| SelectItem::Expr { expr: e, alias },
        ),
    ))(input)
}

fn join_type(input: &str) -> IResult<&str, JoinType> {
    alt((
        map(
            tuple((keyword("INNER"), keyword("JOIN"))),
            |_| JoinType::Inner,
        ),
        map(keyword("JOIN"), |_| JoinType::Inner),
        map(
            tuple((keyword("LEFT"), opt(keyword("OUTER")), keyword("JOIN"))),
            |_| JoinType::Left,
        ),
        map(
            tuple((keyword("RIGHT"), opt(keyword("OUTER")), keyword("JOIN"))),
            |_| JoinType::Right,
        ),
    ))(input)
}

fn join_clause(input: &str) -> IResult<&str, JoinClause> {
    map(
        tuple((join_type, identifier, keyword("ON"), expr)),
        |(join_type, table, _, on)| JoinClause {
            join_type,
            table,
            on,
        },
    )(input)
}

fn sort_dir(input: &str) -> IResult<&str, SortDir> {
    alt((
        map(keyword("ASC"), |_| SortDir::Asc),
        map(keyword("DESC"), |_| SortDir::Desc),
    ))(input)
}

fn order_item(input: &str) -> IResult<&str, OrderItem> {
    alt((
        map(keyword("VIBES"), |_| OrderItem::Vibes),
        map(
            tuple((
                keyword("SIMILARITY"),
                keyword("TO"),
                string_literal,
                opt(preceded(keyword("ON"), identifier)),
            )),
            |(_, _, literal, dim)| OrderItem::Similarity {
                literal,
                dimension_column: dim,
            },
        ),
        map(
            tuple((qualified_identifier, opt(sort_dir))),
            |(col, dir)| OrderItem::Column(col, dir.unwrap_or(SortDir::Asc)),
        ),
    ))(input)
}

fn unsigned_usize(input: &str) -> IResult<&str, usize> {
    map_res(digit1, str::parse::<usize>)(input)
}

pub fn select(input: &str) -> IResult<&str, SelectStatement> {
    map(
        tuple((
            keyword("SELECT"),
            separated_list1(ws(char(',')), select_item),
            keyword("FROM"),
            identifier,
            nom::multi::many0(join_clause),
            opt(preceded(keyword("WHERE"), expr)),
            opt(preceded(
                tuple((keyword("GROUP"), keyword("BY"))),
                separated_list1(ws(char(',')), identifier),
            )),
            opt(preceded(keyword("HAVING"), expr)),
            opt(preceded(
                tuple((keyword("ORDER"), keyword("BY"))),
                separated_list1(ws(char(',')), order_item),
            )),
            opt(preceded(keyword("LIMIT"), unsigned_usize)),
            opt(preceded(keyword("OFFSET"), unsigned_usize)),
        )),
        |(_, columns, _, from, joins, filter, group_by, having, order_by, limit, offset)| {
            SelectStatement {
                columns,
                from,
                joins,
                filter,
                group_by: group_by.unwrap_or_default(),
                having,
                order_by: order_by.unwrap_or_default(),
                limit,
                offset,
            }
        },
    )(input)
}

/// Exposed for `src/parser/dml.rs`, which parses plain scalar assignment
/// values (not full expressions) but shares the literal grammar.
pub fn literal_value(input: &str) -> IResult<&str, Value> {
    value(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_select() {
        let (rest, stmt) = select("SELECT a, b FROM t WHERE a = 1").unwrap();
        assert!(rest.is_empty());
        assert_eq!(stmt.from, "t");
        assert_eq!(stmt.columns.len(), 2);
        assert!(stmt.filter.is_some());
    }

    #[test]
    fn parses_join_and_group_by_having() {
        let sql = "SELECT dept, COUNT(*) FROM emp JOIN dept ON emp.dept_id = dept.id GROUP BY dept HAVING COUNT(*) > 2";
        let (rest, stmt) = select(sql).unwrap();
        assert!(rest.is_empty());
        assert_eq!(stmt.joins.len(), 1);
        assert_eq!(stmt.group_by, vec!["dept".to_string()]);
        assert!(stmt.having.is_some());
    }

    #[test]
    fn parses_similarity_order_by() {
        let sql = "SELECT * FROM docs ORDER BY SIMILARITY TO 'hello world' LIMIT 5";
        let (rest, stmt) = select(sql).unwrap();
        assert!(rest.is_empty());
        assert_eq!(stmt.limit, Some(5));
        assert!(matches!(stmt.order_by[0], OrderItem::Similarity { .. }));
    }

    #[test]
    fn parses_scalar_subquery_comparison() {
        let sql = "SELECT * FROM p WHERE price > (SELECT price FROM prices)";
        let (rest, stmt) = select(sql).unwrap();
        assert!(rest.is_empty());
        assert!(matches!(
            stmt.filter,
            Some(Expr::Compare(_, CompareOp::Gt, _))
        ));
    }

    #[test]
    fn parses_exists_subquery() {
        let sql = "SELECT * FROM a WHERE EXISTS (SELECT x FROM b)";
        let (rest, stmt) = select(sql).unwrap();
        assert!(rest.is_empty());
        assert!(matches!(stmt.filter, Some(Expr::Exists { negated: false, .. })));
    }
}

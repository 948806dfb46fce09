/*!
 * nom parser for the LDAP search-filter grammar.
 *
 * ```text
 * filter     = '(' filtercomp ')'
 * filtercomp = '&' filterlist | '|' filterlist | '!' filter | item
 * filterlist = 1*filter
 * item       = attr ('=' | '~=' | '>=' | '<=') value
 * ```
 *
 * Inside a value, `*` is the substring wildcard and `\` escapes the
 * next character (so `\*` is a literal asterisk). A value that is
 * exactly `*` is a presence test. Wildcards are only legal with `=`.
 */

use nom::{
    branch::alt,
    bytes::complete::{tag, take_while1},
    character::complete::{anychar, char, multispace0},
    combinator::{all_consuming, map},
    multi::{many0, many1},
    sequence::{delimited, preceded},
    IResult,
};

use crate::error::{BusError, BusResult};
use crate::filter::{CompareOp, Filter};

/**
 * Parses a complete predicate. The whole input must be consumed;
 * anything else is an invalid-argument error.
 */
pub fn parse(input: &str) -> BusResult<Filter> {
    match all_consuming(delimited(multispace0, filter, multispace0))(input) {
        Ok((_, parsed)) => Ok(parsed),
        Err(_) => Err(BusError::InvalidArgument(format!(
            "malformed predicate: {input:?}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Grammar
// ---------------------------------------------------------------------------

fn filter(input: &str) -> IResult<&str, Filter> {
    delimited(
        char('('),
        delimited(multispace0, filter_comp, multispace0),
        char(')'),
    )(input)
}

fn filter_comp(input: &str) -> IResult<&str, Filter> {
    alt((and, or, not, item))(input)
}

fn and(input: &str) -> IResult<&str, Filter> {
    map(preceded(char('&'), filter_list), Filter::And)(input)
}

fn or(input: &str) -> IResult<&str, Filter> {
    map(preceded(char('|'), filter_list), Filter::Or)(input)
}

fn not(input: &str) -> IResult<&str, Filter> {
    map(preceded(char('!'), preceded(multispace0, filter)), |inner| {
        Filter::Not(Box::new(inner))
    })(input)
}

fn filter_list(input: &str) -> IResult<&str, Vec<Filter>> {
    many1(preceded(multispace0, filter))(input)
}

fn operator(input: &str) -> IResult<&str, CompareOp> {
    alt((
        map(tag(">="), |_| CompareOp::GreaterEq),
        map(tag("<="), |_| CompareOp::LessEq),
        map(tag("~="), |_| CompareOp::Approx),
        map(tag("="), |_| CompareOp::Equal),
    ))(input)
}

fn attribute(input: &str) -> IResult<&str, &str> {
    take_while1(|c: char| {
        !c.is_whitespace() && !matches!(c, '=' | '<' | '>' | '~' | '(' | ')' | '*' | '\\' | '!' | '&' | '|')
    })(input)
}

/// One piece of a value: literal text, or the `*` wildcard.
enum Chunk {
    Text(String),
    Wild,
}

fn value_chunks(input: &str) -> IResult<&str, Vec<Chunk>> {
    many0(alt((
        map(preceded(char('\\'), anychar), |c| Chunk::Text(c.to_string())),
        map(char('*'), |_| Chunk::Wild),
        map(
            take_while1(|c: char| !matches!(c, '(' | ')' | '*' | '\\')),
            |s: &str| Chunk::Text(s.to_string()),
        ),
    )))(input)
}

fn item(input: &str) -> IResult<&str, Filter> {
    let (input, attr) = attribute(input)?;
    let (input, op) = operator(input)?;
    let (input, chunks) = value_chunks(input)?;

    /*
     * Coalesce the chunks into literal runs separated by wildcards.
     * `parts` always has wildcard-count + 1 entries; an empty entry at
     * either end marks an unanchored start or end.
     */
    let mut parts: Vec<String> = vec![String::new()];
    for chunk in chunks {
        match chunk {
            Chunk::Text(text) => {
                if let Some(last) = parts.last_mut() {
                    last.push_str(&text);
                }
            }
            Chunk::Wild => parts.push(String::new()),
        }
    }

    if parts.len() == 1 {
        // no wildcard: a plain comparison
        let value = parts.remove(0);
        return Ok((
            input,
            Filter::Simple {
                attr: attr.to_string(),
                op,
                value,
            },
        ));
    }

    // wildcards are only meaningful for equality
    if op != CompareOp::Equal {
        return Err(nom::Err::Failure(nom::error::Error::new(
            input,
            nom::error::ErrorKind::Verify,
        )));
    }

    if parts.len() == 2 && parts[0].is_empty() && parts[1].is_empty() {
        return Ok((input, Filter::Present(attr.to_string())));
    }

    let terminal = match parts.pop() {
        Some(last) if !last.is_empty() => Some(last),
        _ => None,
    };
    let initial = if parts[0].is_empty() {
        parts.remove(0);
        None
    } else {
        Some(parts.remove(0))
    };
    let any: Vec<String> = parts.into_iter().filter(|p| !p.is_empty()).collect();

    Ok((
        input,
        Filter::Substring {
            attr: attr.to_string(),
            initial,
            any,
            terminal,
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shapes() {
        assert_eq!(
            parse("(k=v)").unwrap(),
            Filter::Simple {
                attr: "k".into(),
                op: CompareOp::Equal,
                value: "v".into()
            }
        );
        assert_eq!(parse("(k=*)").unwrap(), Filter::Present("k".into()));
        assert_eq!(
            parse("(k=a*b*c)").unwrap(),
            Filter::Substring {
                attr: "k".into(),
                initial: Some("a".into()),
                any: vec!["b".into()],
                terminal: Some("c".into()),
            }
        );
        assert_eq!(
            parse("(k=*mid*)").unwrap(),
            Filter::Substring {
                attr: "k".into(),
                initial: None,
                any: vec!["mid".into()],
                terminal: None,
            }
        );
    }

    #[test]
    fn test_parse_composition_with_whitespace() {
        let parsed = parse(" ( & (a=1) ( | (b=2) (!(c=3)) ) ) ").unwrap();
        match parsed {
            Filter::And(parts) => assert_eq!(parts.len(), 2),
            other => panic!("expected And, got {other:?}"),
        }
    }

    /**
     * Escapes make the wildcard and parentheses literal.
     */
    #[test]
    fn test_parse_escapes() {
        assert_eq!(
            parse(r"(k=a\*b)").unwrap(),
            Filter::Simple {
                attr: "k".into(),
                op: CompareOp::Equal,
                value: "a*b".into()
            }
        );
        assert_eq!(
            parse(r"(k=\(x\))").unwrap(),
            Filter::Simple {
                attr: "k".into(),
                op: CompareOp::Equal,
                value: "(x)".into()
            }
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for bad in ["", "k=v", "(k=v", "(=v)", "(&)", "(k>=a*)", "(k=v)(x=y)"] {
            assert!(parse(bad).is_err(), "should reject {bad:?}");
        }
    }
}

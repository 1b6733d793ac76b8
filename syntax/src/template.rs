//! Parsers for brace-style placeholder templates, e.g. `"{basedir}/{job_name}.log"`.

use combine::parser::char::{alpha_num, char, letter, string};
use combine::parser::range::recognize;
use combine::{attempt, between, choice, eof, many, none_of, skip_many, skip_many1, Parser};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Malformed template near \"{snippet}\" (offset {pos}): {msg}")]
pub struct Error {
    pub pos: usize,
    pub snippet: String,
    msg: String,
}

/// One piece of a parsed template.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Text copied through unchanged
    Literal(&'a str),
    /// An escaped brace (`{{` or `}}`), rendered as a single brace
    Brace(char),
    /// A named placeholder, `{name}`
    Placeholder(&'a str),
}

p! {
    ident() -> &'a str, {
        recognize(
            char('_').or(letter()).and(skip_many(char('_').or(alpha_num())))
        )
    }
}

p! {
    literal() -> Segment<'a>, {
        recognize(skip_many1(none_of("{}".chars()))).map(Segment::Literal)
    }
}

p! {
    brace() -> Segment<'a>, {
        attempt(string("{{")).map(|_| Segment::Brace('{'))
            .or(attempt(string("}}")).map(|_| Segment::Brace('}')))
    }
}

p! {
    placeholder() -> Segment<'a>, {
        between(char('{'), char('}'), ident()).map(Segment::Placeholder)
    }
}

p! {
    segments() -> Vec<Segment<'a>>, {
        many(choice((literal(), brace(), placeholder()))).skip(eof())
    }
}

/// Split `text` into literal text, escaped braces and placeholders.
pub fn parse(text: &str) -> Result<Vec<Segment<'_>>, Error> {
    use combine::EasyParser;
    segments()
        .easy_parse(text)
        .map(|(segments, _remainder)| segments)
        .map_err(|e| {
            let pos = e.position.translate_position(text);
            let snippet = text[pos..].chars().take(24).collect();
            // combine's errors borrow the input, so we stringify before returning.
            Error {
                pos,
                snippet,
                msg: e.to_string(),
            }
        })
}

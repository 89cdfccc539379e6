//! Parsing utilities for SIP message components

use bytes::Bytes;
use internal::{Finish, IResult, verbose_error_to_owned};
use nom::branch::alt;
use nom::character::complete::{anychar, char, none_of};
use nom::combinator::recognize;
use nom::error::VerboseError;
use nom::multi::many0;
use nom::sequence::{delimited, preceded};

/// Types which can be parsed out of a shared source buffer.
///
/// `src` must be the buffer the parsed `&str` points into, so parsed
/// values can be kept as cheap [`bytesstr::BytesStr`] views.
pub trait Parse: Sized {
    fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_;
}

/// Error returned by the `FromStr` implementations of this crate
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("invalid input: {0:?}")]
    Invalid(VerboseError<String>),
    #[error("unexpected trailing input {0:?}")]
    Trailing(String),
}

pub(crate) fn parse_complete<'s, T, P, F>(
    src: &'s Bytes,
    i: &'s str,
    parser: F,
) -> Result<T, ParseError>
where
    F: FnOnce(&'s Bytes) -> P,
    P: Fn(&'s str) -> IResult<&'s str, T>,
{
    match parser(src)(i).finish() {
        Ok(("", value)) => Ok(value),
        Ok((rem, _)) => Err(ParseError::Trailing(rem.into())),
        Err(e) => Err(ParseError::Invalid(verbose_error_to_owned(e))),
    }
}

pub(crate) fn parse_quoted(i: &str) -> IResult<&str, &str> {
    delimited(
        char('"'),
        recognize(many0(alt((preceded(char('\\'), anychar), none_of("\"\\"))))),
        char('"'),
    )(i)
}

pub(crate) fn whitespace(c: char) -> bool {
    internal::is_ws(c)
}

#[rustfmt::skip]
pub(crate) fn token(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '.' | '!' | '%' | '*' | '_' | '`' | '\'' | '~' | '+')
}

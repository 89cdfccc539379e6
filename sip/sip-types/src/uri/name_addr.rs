use super::sip::SipUri;
use crate::parse::{Parse, parse_quoted, whitespace};
use bytes::Bytes;
use bytesstr::BytesStr;
use internal::IResult;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::combinator::{map, opt};
use nom::sequence::{delimited, tuple};
use std::fmt;

/// URI with an optional display name: `(token|"display") <URI> | URI`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameAddr {
    pub name: Option<BytesStr>,
    pub uri: SipUri,
}

impl NameAddr {
    pub fn new<N: Into<BytesStr>>(name: N, uri: SipUri) -> Self {
        Self {
            name: Some(name.into()),
            uri,
        }
    }

    pub fn uri(uri: SipUri) -> Self {
        Self { name: None, uri }
    }

    /// Parse a name-addr as it appears in header values, where parameters
    /// following a URI without angle brackets belong to the header.
    pub(crate) fn parse_no_params(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            alt((
                Self::parse_bracketed(src),
                map(SipUri::parse_no_params(src), NameAddr::uri),
            ))(i)
        }
    }

    fn parse_bracketed(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            map(
                tuple((
                    opt(alt((parse_quoted, take_while1(display)))),
                    take_while(whitespace),
                    delimited(tag("<"), SipUri::parse(src), tag(">")),
                )),
                |(name, _, uri)| Self {
                    name: name
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(|name| BytesStr::from_parse(src, name)),
                    uri,
                },
            )(i)
        }
    }
}

impl Parse for NameAddr {
    fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            alt((
                Self::parse_bracketed(src),
                map(SipUri::parse(src), NameAddr::uri),
            ))(i)
        }
    }
}
impl_from_str!(NameAddr);

impl fmt::Display for NameAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            write!(f, "\"{name}\" ")?;
        }

        write!(f, "<{}>", self.uri)
    }
}

fn display(c: char) -> bool {
    !matches!(c, ':' | '\r' | '\n' | '<' | '"')
}

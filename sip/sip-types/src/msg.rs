//! Message lines and the message-head line splitter

use crate::code::StatusCode;
use crate::method::Method;
use crate::parse::{Parse, token, whitespace};
use crate::uri::SipUri;
use crate::Name;
use bytes::Bytes;
use bytesstr::BytesStr;
use internal::{IResult, ws};
use memchr::memchr;
use nom::AsChar;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::char;
use nom::combinator::{map, map_res, rest};
use nom::sequence::{preceded, separated_pair, terminated, tuple};
use std::fmt;
use std::str::FromStr;

/// A `name: value` header line
#[derive(Debug)]
pub struct Line {
    pub name: Name,
    pub value: BytesStr,
}

impl Line {
    pub fn parse<'i>(src: &Bytes, i: &'i str) -> IResult<&'i str, Self> {
        map(
            ws((take_while1(token), char(':'), rest)),
            |(name, _, value): (&str, _, &str)| Line {
                name: BytesStr::from_parse(src, name).into(),
                value: BytesStr::from_parse(src, value.trim()),
            },
        )(i)
    }
}

/// First line of any SIP message
#[derive(Debug, Clone)]
pub enum MessageLine {
    Request(RequestLine),
    Response(StatusLine),
}

impl Parse for MessageLine {
    fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            alt((
                map(StatusLine::parse(src), MessageLine::Response),
                map(RequestLine::parse(src), MessageLine::Request),
            ))(i)
        }
    }
}
impl_from_str!(MessageLine);

impl MessageLine {
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request(..))
    }
}

impl fmt::Display for MessageLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageLine::Request(line) => line.fmt(f),
            MessageLine::Response(line) => line.fmt(f),
        }
    }
}

/// First line of a SIP request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    pub method: Method,
    pub uri: SipUri,
}

impl Parse for RequestLine {
    fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            map(
                separated_pair(
                    Method::parse(src),
                    take_while(whitespace),
                    terminated(SipUri::parse(src), tuple((take_while(whitespace), tag("SIP/2.0")))),
                ),
                |(method, uri)| RequestLine { method, uri },
            )(i)
        }
    }
}

impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} SIP/2.0", self.method, self.uri)
    }
}

/// First line of a SIP response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub code: StatusCode,
    pub reason: Option<BytesStr>,
}

impl Parse for StatusLine {
    fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            map(
                preceded(
                    tuple((tag("SIP/2.0"), take_while1(whitespace))),
                    tuple((
                        map_res(take_while1(char::is_dec_digit), u16::from_str),
                        rest,
                    )),
                ),
                |(code, reason): (u16, &str)| StatusLine {
                    code: StatusCode::from(code),
                    reason: match reason.trim() {
                        "" => None,
                        reason => Some(BytesStr::from_parse(src, reason)),
                    },
                },
            )(i)
        }
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0 {}", self.code.into_u16())?;

        match (&self.reason, self.code.text()) {
            (Some(reason), _) => write!(f, " {reason}"),
            (None, Some(text)) => write!(f, " {text}"),
            (None, None) => Ok(()),
        }
    }
}

/// Splits a message head into its lines.
///
/// Lines end with `\n` or `\r\n`, a line break followed by a space or tab continues the
/// previous line. The iterator ends at the empty line separating head and body.
/// If neither could be found the head is incomplete and `Err(Incomplete)` is returned.
///
/// ```
/// use dialtone_sip_types::msg::HeadLines;
///
/// let msg = b"OPTIONS sip:user@example.com SIP/2.0\r\nAccept: application/sdp,\r\n message/sipfrag\r\nl: 0\r\n\r\n";
///
/// let mut lines = HeadLines::new(msg);
///
/// assert_eq!(lines.next(), Some(Ok(&b"OPTIONS sip:user@example.com SIP/2.0"[..])));
/// assert_eq!(lines.next(), Some(Ok(&b"Accept: application/sdp,\r\n message/sipfrag"[..])));
/// assert_eq!(lines.next(), Some(Ok(&b"l: 0"[..])));
/// assert_eq!(lines.next(), None);
/// assert_eq!(lines.head_end(), msg.len());
/// ```
#[derive(Clone)]
pub struct HeadLines<'i> {
    input: &'i [u8],
    progress: usize,
}

/// The message head is not complete yet
#[derive(Debug, PartialEq, Eq)]
pub struct Incomplete;

impl<'i> HeadLines<'i> {
    pub fn new(input: &'i [u8]) -> Self {
        Self { input, progress: 0 }
    }

    /// Index of the first body byte, only valid once the iterator returned `None`
    pub fn head_end(&self) -> usize {
        match self.input[self.progress..] {
            [b'\r', b'\n', ..] => self.progress + 2,
            [b'\n', ..] => self.progress + 1,
            _ => self.progress,
        }
    }
}

impl<'i> Iterator for HeadLines<'i> {
    type Item = Result<&'i [u8], Incomplete>;

    fn next(&mut self) -> Option<Self::Item> {
        let begin = self.progress;
        let mut search = begin;

        loop {
            let Some(lf) = memchr(b'\n', &self.input[search..]).map(|pos| search + pos) else {
                return Some(Err(Incomplete));
            };

            let end = if lf > begin && self.input[lf - 1] == b'\r' {
                lf - 1
            } else {
                lf
            };

            if end == begin {
                // empty line, end of head
                return None;
            }

            match self.input.get(lf + 1) {
                Some(b' ' | b'\t') => {
                    search = lf + 1;
                }
                Some(_) => {
                    self.progress = lf + 1;
                    return Some(Ok(&self.input[begin..end]));
                }
                None => return Some(Err(Incomplete)),
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn request_line() {
        let line: MessageLine = "INVITE sip:bob@biloxi.example.com SIP/2.0".parse().unwrap();

        let MessageLine::Request(line) = line else {
            panic!("expected request line");
        };

        assert_eq!(line.method, Method::INVITE);
        assert_eq!(line.uri.user.as_deref(), Some("bob"));
    }

    #[test]
    fn status_line() {
        let line: MessageLine = "SIP/2.0 486 Busy Here".parse().unwrap();

        let MessageLine::Response(line) = line else {
            panic!("expected status line");
        };

        assert_eq!(line.code, StatusCode::BUSY_HERE);
        assert_eq!(line.reason.as_deref(), Some("Busy Here"));
    }

    #[test]
    fn status_line_default_reason() {
        let line = StatusLine {
            code: StatusCode::RINGING,
            reason: None,
        };

        assert_eq!(line.to_string(), "SIP/2.0 180 Ringing");
    }

    #[test]
    fn incomplete_head() {
        let mut lines = HeadLines::new(b"OPTIONS sip:user@example.com SIP/2.0\nTo: sip:user@example.com\nFrom: caller<si");

        assert!(lines.next().unwrap().is_ok());
        assert!(lines.next().unwrap().is_ok());
        assert_eq!(lines.next(), Some(Err(Incomplete)));
    }

    #[test]
    fn header_line() {
        let src = Bytes::from_static(b"Max-Forwards :  70 ");
        let (_, line) = Line::parse(&src, std::str::from_utf8(&src).unwrap()).unwrap();

        assert_eq!(line.name, Name::MAX_FORWARDS);
        assert_eq!(line.value, "70");
    }
}

use crate::parse::parse_quoted;
use bytes::Bytes;
use bytesstr::BytesStr;
use internal::{IResult, ws};
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::combinator::{map, opt, recognize};
use nom::multi::many0;
use nom::sequence::{delimited, preceded};
use std::fmt;

/// Semicolon separated `name[=value]` list, as found in URIs and header values
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Params {
    params: Vec<Param>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Param {
    pub name: BytesStr,
    pub value: Option<BytesStr>,
}

impl Param {
    pub fn name<N: Into<BytesStr>>(name: N) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn value<N: Into<BytesStr>, V: Into<BytesStr>>(name: N, value: V) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)?;

        if let Some(value) = &self.value {
            write!(f, "={value}")?;
        }

        Ok(())
    }
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Param> {
        self.params.iter()
    }

    #[inline]
    pub fn with(mut self, param: Param) -> Self {
        self.push(param);
        self
    }

    #[inline]
    pub fn push(&mut self, param: Param) {
        self.params.push(param);
    }

    /// Parameter names are compared case-insensitively
    pub fn get(&self, name: &str) -> Option<&Param> {
        self.params
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn get_val(&self, name: &str) -> Option<&BytesStr> {
        self.get(name).and_then(|p| p.value.as_ref())
    }

    pub fn take(&mut self, name: &str) -> Option<BytesStr> {
        let pos = self
            .params
            .iter()
            .position(|p| p.name.eq_ignore_ascii_case(name))?;

        self.params.remove(pos).value
    }

    pub fn push_or_edit<N, V>(&mut self, name: N, value: V)
    where
        N: Into<BytesStr> + AsRef<str>,
        V: Into<BytesStr>,
    {
        if let Some(param) = self
            .params
            .iter_mut()
            .find(|p| p.name.eq_ignore_ascii_case(name.as_ref()))
        {
            param.value = Some(value.into());
        } else {
            self.push(Param::value(name, value));
        }
    }

    pub(crate) fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            map(
                many0(preceded(ws((tag(";"),)), param(src))),
                |params| Params { params },
            )(i)
        }
    }
}

fn param(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Param> + '_ {
    move |i| {
        map(
            ws((
                take_while1(param_char),
                opt(preceded(
                    ws((tag("="),)),
                    preceded(
                        take_while_ws,
                        alt((
                            recognize(parse_quoted),
                            recognize(delimited(tag("["), take_while1(|c| c != ']'), tag("]"))),
                            take_while1(param_char),
                        )),
                    ),
                )),
            )),
            |(name, value)| Param {
                name: BytesStr::from_parse(src, name),
                value: value.map(|value| BytesStr::from_parse(src, value)),
            },
        )(i)
    }
}

fn take_while_ws(i: &str) -> IResult<&str, &str> {
    nom::bytes::complete::take_while(crate::parse::whitespace)(i)
}

#[rustfmt::skip]
fn param_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '.' | '!' | '%' | '*' | '_' | '+' | '`' | '\'' | '~' | '[' | ']' | '/' | ':' | '&' | '$')
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for param in &self.params {
            write!(f, ";{param}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn params() {
        let input = BytesStr::from_static(";transport=tcp;lr ; expires = 3600;+sip.instance=\"<urn:x>\"");

        let (rem, params) = Params::parse(input.as_ref())(&input).unwrap();

        assert!(rem.is_empty());
        assert_eq!(params.get_val("transport").unwrap(), "tcp");
        assert!(params.contains("lr"));
        assert_eq!(params.get_val("EXPIRES").unwrap(), "3600");
        assert_eq!(params.get_val("+sip.instance").unwrap(), "\"<urn:x>\"");
    }

    #[test]
    fn print() {
        let params = Params::new()
            .with(Param::value("tag", "abc"))
            .with(Param::name("lr"));

        assert_eq!(params.to_string(), ";tag=abc;lr");
    }
}

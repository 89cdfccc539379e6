use super::params::Params;
use crate::host::HostPort;
use crate::parse::Parse;
use bytes::Bytes;
use bytesstr::BytesStr;
use internal::IResult;
use nom::branch::alt;
use nom::bytes::complete::{tag, tag_no_case, take_while1};
use nom::combinator::{map, opt};
use nom::error::context;
use nom::sequence::{terminated, tuple};
use std::fmt;

/// `sip:` or `sips:` URI
///
/// Header parameters (`?name=value`) are not supported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipUri {
    pub sips: bool,
    pub user: Option<BytesStr>,
    pub host_port: HostPort,
    pub params: Params,
}

impl SipUri {
    pub fn new(host_port: HostPort) -> Self {
        SipUri {
            sips: false,
            user: None,
            host_port,
            params: Params::new(),
        }
    }

    pub fn user<U: Into<BytesStr>>(mut self, user: U) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn sips(mut self, sips: bool) -> Self {
        self.sips = sips;
        self
    }

    /// Compare scheme, user and host-port, ignoring parameters
    pub fn compare(&self, other: &Self) -> bool {
        self.sips == other.sips && self.user == other.user && self.host_port == other.host_port
    }

    pub(crate) fn parse_no_params(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            map(
                tuple((parse_scheme, opt(terminated(take_while1(user), tag("@"))), HostPort::parse(src))),
                |(sips, user, host_port)| SipUri {
                    sips,
                    user: user.map(|user| BytesStr::from_parse(src, user)),
                    host_port,
                    params: Params::new(),
                },
            )(i)
        }
    }
}

impl Parse for SipUri {
    fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            context(
                "parsing sip uri",
                map(
                    tuple((SipUri::parse_no_params(src), Params::parse(src))),
                    |(uri, params)| SipUri { params, ..uri },
                ),
            )(i)
        }
    }
}
impl_from_str!(SipUri);

impl fmt::Display for SipUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.sips {
            f.write_str("sips:")?;
        } else {
            f.write_str("sip:")?;
        }

        if let Some(user) = &self.user {
            write!(f, "{user}@")?;
        }

        write!(f, "{}{}", self.host_port, self.params)
    }
}

#[rustfmt::skip]
fn user(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | '!' | '~' | '*' | '\'' | '(' | ')' | '%' | '&' | '=' | '+' | '$' | ',' | '?' | '/' | '#')
}

fn parse_scheme(i: &str) -> IResult<&str, bool> {
    alt((
        map(tag_no_case("sip:"), |_| false),
        map(tag_no_case("sips:"), |_| true),
    ))(i)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::host::Host;

    #[test]
    fn full_uri() {
        let uri: SipUri = "sip:bob@example.com:5062;transport=tcp".parse().unwrap();

        assert!(!uri.sips);
        assert_eq!(uri.user.as_deref(), Some("bob"));
        assert_eq!(uri.host_port.host, Host::Name("example.com".into()));
        assert_eq!(uri.host_port.port, Some(5062));
        assert_eq!(uri.params.get_val("transport").unwrap(), "tcp");
        assert_eq!(uri.to_string(), "sip:bob@example.com:5062;transport=tcp");
    }

    #[test]
    fn without_user() {
        let uri: SipUri = "sips:example.org".parse().unwrap();

        assert!(uri.sips);
        assert!(uri.user.is_none());
    }

    #[test]
    fn rejects_other_schemes() {
        assert!("tel:+15551234".parse::<SipUri>().is_err());
        assert!("".parse::<SipUri>().is_err());
    }
}

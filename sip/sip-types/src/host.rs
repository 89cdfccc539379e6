//! [`Host`] and [`HostPort`] found in URIs and the Via header

use crate::parse::Parse;
use bytes::Bytes;
use bytesstr::BytesStr;
use internal::IResult;
use nom::AsChar;
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while1};
use nom::character::complete::{char, u8};
use nom::combinator::{map, map_res, opt, recognize, verify};
use nom::multi::many0;
use nom::sequence::{delimited, preceded, tuple};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

/// Either an IP address or a domain name
#[derive(Debug, Clone, PartialEq, Hash, Eq)]
pub enum Host {
    IP6(Ipv6Addr),
    IP4(Ipv4Addr),
    Name(BytesStr),
}

impl Parse for Host {
    fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            alt((
                map_res(ip6_reference, |ip6| ip6.parse().map(Self::IP6)),
                map_res(ip4_address, |ip4| ip4.parse().map(Self::IP4)),
                map(hostname, |hostname| {
                    Self::Name(BytesStr::from_parse(src, hostname))
                }),
            ))(i)
        }
    }
}
impl_from_str!(Host);

fn ip4_address(i: &str) -> IResult<&str, &str> {
    recognize(tuple((u8, char('.'), u8, char('.'), u8, char('.'), u8)))(i)
}

fn ip6_reference(i: &str) -> IResult<&str, &str> {
    delimited(
        char('['),
        take_while1(|c: char| c.is_hex_digit() || matches!(c, ':' | '.')),
        char(']'),
    )(i)
}

/// Relaxed hostname, the SIP grammar is stricter than what DNS allows today.
fn hostname(i: &str) -> IResult<&str, &str> {
    recognize(tuple((
        label,
        many0(tuple((char('.'), label))),
        opt(char('.')),
    )))(i)
}

fn label(i: &str) -> IResult<&str, &str> {
    verify(
        take_while1(|c: char| c.is_alphanum() || c == '-' || c == '_'),
        |label: &str| !(label.starts_with('-') || label.ends_with('-')),
    )(i)
}

impl From<IpAddr> for Host {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(addr) => Host::IP4(addr),
            IpAddr::V6(addr) => Host::IP6(addr),
        }
    }
}

impl fmt::Display for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Host::IP6(addr) => write!(f, "[{addr}]"),
            Host::IP4(addr) => write!(f, "{addr}"),
            Host::Name(name) => f.write_str(name),
        }
    }
}

/// [`Host`] paired with an optional port
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct HostPort {
    pub host: Host,
    pub port: Option<u16>,
}

impl HostPort {
    /// Returns the ip-address if the host part is one
    pub fn ip(&self) -> Option<IpAddr> {
        match self.host {
            Host::IP4(ip) => Some(IpAddr::V4(ip)),
            Host::IP6(ip) => Some(IpAddr::V6(ip)),
            Host::Name(_) => None,
        }
    }

    pub fn host_name<S: Into<BytesStr>>(name: S, port: Option<u16>) -> HostPort {
        HostPort {
            host: Host::Name(name.into()),
            port,
        }
    }

    /// Returns the socket address if host is an ip-address, using `default_port` if no port is set
    pub fn socket_addr(&self, default_port: u16) -> Option<SocketAddr> {
        self.ip()
            .map(|ip| SocketAddr::new(ip, self.port.unwrap_or(default_port)))
    }
}

impl Parse for HostPort {
    fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| {
            map(
                tuple((Host::parse(src), opt(preceded(tag(":"), nom::character::complete::u16)))),
                |(host, port)| HostPort { host, port },
            )(i)
        }
    }
}
impl_from_str!(HostPort);

impl From<SocketAddr> for HostPort {
    fn from(addr: SocketAddr) -> Self {
        HostPort {
            host: addr.ip().into(),
            port: Some(addr.port()),
        }
    }
}

impl fmt::Display for HostPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.host)?;

        if let Some(port) = self.port {
            write!(f, ":{port}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn host_name_with_port() {
        let host_port: HostPort = "sip.example.com:5080".parse().unwrap();

        assert_eq!(host_port.host, Host::Name("sip.example.com".into()));
        assert_eq!(host_port.port, Some(5080));
    }

    #[test]
    fn ip6_host() {
        let host_port: HostPort = "[::1]:5060".parse().unwrap();

        assert_eq!(host_port.ip(), Some("::1".parse().unwrap()));
        assert_eq!(host_port.to_string(), "[::1]:5060");
    }

    #[test]
    fn ip4_without_port() {
        let host_port: HostPort = "192.0.2.10".parse().unwrap();

        assert_eq!(host_port.socket_addr(5060), Some("192.0.2.10:5060".parse().unwrap()));
    }
}

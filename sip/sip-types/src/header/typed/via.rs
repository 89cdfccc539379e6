use crate::Name;
use crate::header::{ConstNamed, HeaderParse};
use crate::host::HostPort;
use crate::parse::{Parse, token};
use crate::uri::{Param, Params};
use bytes::Bytes;
use bytesstr::BytesStr;
use internal::{IResult, ws};
use nom::bytes::complete::{tag, tag_no_case, take_while1};
use nom::combinator::map;
use std::fmt;

/// `Via` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Via {
    pub transport: BytesStr,
    pub sent_by: HostPort,
    pub params: Params,
}

impl Via {
    pub fn new<T, B>(transport: T, sent_by: HostPort, branch: B) -> Self
    where
        T: Into<BytesStr>,
        B: Into<BytesStr>,
    {
        Via {
            transport: transport.into(),
            sent_by,
            params: Params::new().with(Param::value("branch", branch)),
        }
    }

    pub fn branch(&self) -> Option<&BytesStr> {
        self.params.get_val("branch")
    }

    /// Request the response to be sent back to the source port (RFC 3581)
    pub fn with_rport(mut self) -> Self {
        self.params.push(Param::name("rport"));
        self
    }
}

impl ConstNamed for Via {
    const NAME: Name = Name::VIA;
}

impl HeaderParse for Via {
    fn parse<'i>(src: &'i Bytes, i: &'i str) -> IResult<&'i str, Self> {
        map(
            ws((
                tag_no_case("SIP"),
                tag("/"),
                tag("2.0"),
                tag("/"),
                take_while1(token),
                ws((HostPort::parse(src), Params::parse(src))),
            )),
            |(_, _, _, _, transport, (sent_by, params))| Via {
                transport: BytesStr::from_parse(src, transport),
                sent_by,
                params,
            },
        )(i)
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/{} {}{}", self.transport, self.sent_by, self.params)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Headers;

    #[test]
    fn via_list() {
        let mut headers = Headers::new();
        headers.insert(
            Name::VIA,
            "SIP/2.0/UDP pc33.example.com;branch=z9hG4bK776asdhds , SIP/2.0/TCP 10.0.0.1:5070;branch=z9hG4bKabc;rport",
        );
        headers.insert("v", "SIP/2.0/TLS [::1]:5061;branch=z9hG4bKxyz");

        let vias: Vec<Via> = headers.get_all_named().unwrap();

        assert_eq!(vias.len(), 3);
        assert_eq!(vias[0].transport, "UDP");
        assert_eq!(vias[0].branch().unwrap(), "z9hG4bK776asdhds");
        assert_eq!(vias[1].sent_by.port, Some(5070));
        assert!(vias[1].params.contains("rport"));
        assert_eq!(vias[2].transport, "TLS");
    }

    #[test]
    fn print_via() {
        let via = Via::new("UDP", "192.0.2.1:5060".parse().unwrap(), "z9hG4bK1234").with_rport();

        assert_eq!(via.to_string(), "SIP/2.0/UDP 192.0.2.1:5060;branch=z9hG4bK1234;rport");
    }
}

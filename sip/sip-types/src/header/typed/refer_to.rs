use crate::Name;
use crate::header::{ConstNamed, HeaderParse};
use crate::uri::{NameAddr, Params};
use bytes::Bytes;
use internal::IResult;
use nom::combinator::map;
use nom::sequence::tuple;
use std::fmt;

/// `Refer-To` header (RFC 3515)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferTo {
    pub uri: NameAddr,
    pub params: Params,
}

impl ReferTo {
    pub fn new(uri: NameAddr) -> Self {
        Self {
            uri,
            params: Params::new(),
        }
    }
}

impl ConstNamed for ReferTo {
    const NAME: Name = Name::REFER_TO;
}

impl HeaderParse for ReferTo {
    fn parse<'i>(src: &'i Bytes, i: &'i str) -> IResult<&'i str, Self> {
        map(
            tuple((NameAddr::parse_no_params(src), Params::parse(src))),
            |(uri, params)| ReferTo { uri, params },
        )(i.trim_start())
    }
}

impl fmt::Display for ReferTo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.uri, self.params)
    }
}

use crate::Name;
use crate::header::{ConstNamed, HeaderParse};
use crate::method::Method;
use crate::parse::{Parse, whitespace};
use bytes::Bytes;
use internal::IResult;
use nom::bytes::complete::take_while;
use nom::character::complete::u32;
use nom::combinator::map;
use nom::sequence::separated_pair;
use std::fmt;

/// `CSeq` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSeq {
    pub cseq: u32,
    pub method: Method,
}

impl CSeq {
    #[inline]
    pub const fn new(cseq: u32, method: Method) -> CSeq {
        CSeq { cseq, method }
    }
}

impl ConstNamed for CSeq {
    const NAME: Name = Name::CSEQ;
}

impl HeaderParse for CSeq {
    fn parse<'i>(src: &'i Bytes, i: &'i str) -> IResult<&'i str, Self> {
        map(
            separated_pair(u32, take_while(whitespace), Method::parse(src)),
            |(cseq, method)| CSeq { cseq, method },
        )(i.trim_start())
    }
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.cseq, self.method)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Headers;

    #[test]
    fn cseq_more_spaces() {
        let mut headers = Headers::new();
        headers.insert(Name::CSEQ, "43287        INVITE");

        let cseq: CSeq = headers.get_named().unwrap();

        assert_eq!(cseq, CSeq::new(43287, Method::INVITE));
    }

    #[test]
    fn cseq_print() {
        assert_eq!(CSeq::new(3487, Method::REGISTER).to_string(), "3487 REGISTER");
    }
}

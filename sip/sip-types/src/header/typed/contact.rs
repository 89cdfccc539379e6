use crate::Name;
use crate::header::{ConstNamed, HeaderParse};
use crate::uri::{NameAddr, Params};
use bytes::Bytes;
use internal::IResult;
use nom::combinator::map;
use nom::sequence::tuple;
use std::fmt;

/// `Contact` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub uri: NameAddr,
    pub params: Params,
}

impl Contact {
    pub fn new(uri: NameAddr) -> Self {
        Self {
            uri,
            params: Params::new(),
        }
    }

    /// Value of the `expires` parameter
    pub fn expires(&self) -> Option<u32> {
        self.params.get_val("expires")?.parse().ok()
    }
}

impl ConstNamed for Contact {
    const NAME: Name = Name::CONTACT;
}

impl HeaderParse for Contact {
    fn parse<'i>(src: &'i Bytes, i: &'i str) -> IResult<&'i str, Self> {
        map(
            tuple((NameAddr::parse_no_params(src), Params::parse(src))),
            |(uri, params)| Contact { uri, params },
        )(i.trim_start())
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.uri, self.params)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::Headers;

    #[test]
    fn contact_expires() {
        let mut headers = Headers::new();
        headers.insert(
            "m",
            "<sip:alice@192.0.2.4:5060>;expires=300, \"Other\" <sip:alice@198.51.100.2>;expires=3600",
        );

        let contacts: Vec<Contact> = headers.get_all_named().unwrap();

        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].expires(), Some(300));
        assert_eq!(contacts[1].uri.name.as_deref(), Some("Other"));
        assert_eq!(contacts[1].expires(), Some(3600));
    }
}

use crate::Name;
use crate::header::{ConstNamed, HeaderParse};
use crate::uri::{NameAddr, Params};
use bytes::Bytes;
use internal::IResult;
use nom::combinator::map;
use nom::sequence::tuple;
use std::fmt;

/// A single `Route` / `Record-Route` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Routing {
    pub uri: NameAddr,
    pub params: Params,
}

impl HeaderParse for Routing {
    fn parse<'i>(src: &'i Bytes, i: &'i str) -> IResult<&'i str, Self> {
        map(
            tuple((NameAddr::parse_no_params(src), Params::parse(src))),
            |(uri, params)| Routing { uri, params },
        )(i.trim_start())
    }
}

impl fmt::Display for Routing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.uri, self.params)
    }
}

macro_rules! routing_header {
    ($name:ident, $header_name:expr) => {
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name(pub Routing);

        impl ConstNamed for $name {
            const NAME: Name = $header_name;
        }

        impl HeaderParse for $name {
            fn parse<'i>(src: &'i Bytes, i: &'i str) -> IResult<&'i str, Self> {
                let (rem, routing) = Routing::parse(src, i)?;

                Ok((rem, $name(routing)))
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

routing_header!(Route, Name::ROUTE);
routing_header!(RecordRoute, Name::RECORD_ROUTE);

#[cfg(test)]
mod test {
    use super::*;
    use crate::Headers;

    #[test]
    fn record_route_list() {
        let mut headers = Headers::new();
        headers.insert(
            Name::RECORD_ROUTE,
            "<sip:p1.example.com;lr>, <sip:p2.example.com;lr>",
        );

        let routes: Vec<RecordRoute> = headers.get_all_named().unwrap();

        assert_eq!(routes.len(), 2);
        assert!(routes[0].0.uri.uri.params.contains("lr"));
        assert_eq!(routes[1].0.to_string(), "<sip:p2.example.com;lr>");
    }
}

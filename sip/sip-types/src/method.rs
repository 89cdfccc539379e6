use crate::parse::{Parse, token};
use bytes::Bytes;
use bytesstr::BytesStr;
use internal::IResult;
use nom::bytes::complete::take_while1;
use nom::combinator::map;
use std::fmt;

/// SIP request method
///
/// # Example
///
/// ```
/// use dialtone_sip_types::Method;
///
/// let invite = Method::INVITE;
/// let custom = Method::from("HELLO");
///
/// assert_eq!(invite.to_string(), "INVITE");
/// assert_eq!(custom.to_string(), "HELLO");
/// ```
#[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Method(Repr);

macro_rules! methods {
    ($($print:literal, $ident:ident;)+) => {
        #[derive(Debug, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[allow(clippy::upper_case_acronyms)]
        enum Repr {
            $($ident,)+
            Other(BytesStr),
        }

        impl Method {
            $(pub const $ident: Self = Self(Repr::$ident);)+

            /// Create a method from a slice of `src`, known methods are matched case-insensitively
            pub fn from_parse(src: &Bytes, slice: &str) -> Self {
                $(
                if slice.eq_ignore_ascii_case($print) {
                    return Self(Repr::$ident);
                }
                )+

                Self(Repr::Other(BytesStr::from_parse(src, slice)))
            }
        }

        impl fmt::Display for Method {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                match &self.0 {
                    $(Repr::$ident => f.write_str($print),)+
                    Repr::Other(other) => f.write_str(other),
                }
            }
        }
    };
}

methods! {
    "INVITE",    INVITE;
    "ACK",       ACK;
    "CANCEL",    CANCEL;
    "BYE",       BYE;
    "REGISTER",  REGISTER;
    "OPTIONS",   OPTIONS;
    "INFO",      INFO;
    "REFER",     REFER;
    "NOTIFY",    NOTIFY;
    "MESSAGE",   MESSAGE;
    "UPDATE",    UPDATE;
    "PRACK",     PRACK;
    "SUBSCRIBE", SUBSCRIBE;
    "PUBLISH",   PUBLISH;
}

impl Parse for Method {
    fn parse(src: &Bytes) -> impl Fn(&str) -> IResult<&str, Self> + '_ {
        move |i| map(take_while1(token), |slice| Self::from_parse(src, slice))(i)
    }
}
impl_from_str!(Method);

impl From<&str> for Method {
    fn from(s: &str) -> Self {
        let s = BytesStr::from(s);

        Self::from_parse(s.as_ref(), s.as_str())
    }
}

#[cfg(test)]
mod test {
    use super::{Method, Repr};

    #[test]
    fn known_method() {
        assert_eq!("invite".parse::<Method>().unwrap(), Method::INVITE);
        assert_eq!(Method::REGISTER.to_string(), "REGISTER");
    }

    #[test]
    fn other_method() {
        let method: Method = "SOMEOBSCUREMETHOD".parse().unwrap();

        assert_eq!(method, Method(Repr::Other("SOMEOBSCUREMETHOD".into())));
        assert_eq!(method.to_string(), "SOMEOBSCUREMETHOD");
    }
}

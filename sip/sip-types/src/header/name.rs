use bytesstr::BytesStr;
use std::fmt;

/// Name of a SIP header, used as key inside [`Headers`](crate::Headers).
///
/// Known names are matched case-insensitively against their long and compact form.
#[derive(Debug, Clone)]
pub struct Name(Repr);

impl Name {
    /// Returns a Name for a header not known to this library
    pub const fn unknown(name: BytesStr) -> Self {
        Self(Repr::Unknown(name))
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        match (&self.0, &other.0) {
            (Repr::Unknown(a), Repr::Unknown(b)) => a.eq_ignore_ascii_case(b),
            (Repr::Unknown(_), _) | (_, Repr::Unknown(_)) => false,
            (a, b) => std::mem::discriminant(a) == std::mem::discriminant(b),
        }
    }
}

impl Eq for Name {}

impl PartialEq<str> for Name {
    fn eq(&self, other: &str) -> bool {
        self.as_print_str().eq_ignore_ascii_case(other)
            || self
                .as_parse_strs()
                .is_some_and(|strs| strs.iter().any(|s| s.eq_ignore_ascii_case(other)))
    }
}

impl PartialEq<&str> for Name {
    fn eq(&self, other: &&str) -> bool {
        self == *other
    }
}

impl<T> From<T> for Name
where
    T: Into<BytesStr> + AsRef<[u8]>,
{
    fn from(name: T) -> Self {
        Name::from_bytes(name)
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_print_str())
    }
}

macro_rules! header_names {
    ($($print:literal, $ident:ident, [$($parse:literal),+], $konst:ident;)+) => {
        #[derive(Debug, Clone)]
        enum Repr {
            $($ident,)+
            Unknown(BytesStr),
        }

        static NAMES: &[(&str, Name)] = &[
            $($( ($parse, Name::$konst), )*)*
        ];

        impl Name {
            $(
            pub const $konst: Name = Name(Repr::$ident);
            )+

            fn from_bytes(name: impl Into<BytesStr> + AsRef<[u8]>) -> Name {
                let slice: &[u8] = name.as_ref();

                for (parse, known) in NAMES {
                    if parse.as_bytes().eq_ignore_ascii_case(slice) {
                        return known.clone();
                    }
                }

                Name::unknown(name.into())
            }

            /// The canonical form used when printing a message
            pub fn as_print_str(&self) -> &str {
                match &self.0 {
                    $(Repr::$ident => $print,)*
                    Repr::Unknown(name) => name.as_str(),
                }
            }

            /// The lower-case long and compact forms accepted when parsing
            pub const fn as_parse_strs(&self) -> Option<&[&str]> {
                match &self.0 {
                    $(
                    Repr::$ident => Some(&[$($parse),*]),
                    )+
                    Repr::Unknown(_) => None,
                }
            }
        }
    };
}

header_names! {
    "Accept",               Accept,             ["accept"],                 ACCEPT;
    "Allow",                Allow,              ["allow"],                  ALLOW;
    "Authorization",        Authorization,      ["authorization"],          AUTHORIZATION;
    "Call-ID",              CallID,             ["call-id", "i"],           CALL_ID;
    "Contact",              Contact,            ["contact", "m"],           CONTACT;
    "Content-Length",       ContentLength,      ["content-length", "l"],    CONTENT_LENGTH;
    "Content-Type",         ContentType,        ["content-type", "c"],      CONTENT_TYPE;
    "CSeq",                 CSeq,               ["cseq"],                   CSEQ;
    "Event",                Event,              ["event", "o"],             EVENT;
    "Expires",              Expires,            ["expires"],                EXPIRES;
    "From",                 From,               ["from", "f"],              FROM;
    "Max-Forwards",         MaxForwards,        ["max-forwards"],           MAX_FORWARDS;
    "Min-Expires",          MinExpires,         ["min-expires"],            MIN_EXPIRES;
    "Proxy-Authenticate",   ProxyAuthenticate,  ["proxy-authenticate"],     PROXY_AUTHENTICATE;
    "Proxy-Authorization",  ProxyAuthorization, ["proxy-authorization"],    PROXY_AUTHORIZATION;
    "Reason",               Reason,             ["reason"],                 REASON;
    "Record-Route",         RecordRoute,        ["record-route"],           RECORD_ROUTE;
    "Refer-To",             ReferTo,            ["refer-to", "r"],          REFER_TO;
    "Referred-By",          ReferredBy,         ["referred-by", "b"],       REFERRED_BY;
    "Route",                Route,              ["route"],                  ROUTE;
    "Server",               Server,             ["server"],                 SERVER;
    "Subscription-State",   SubscriptionState,  ["subscription-state"],     SUBSCRIPTION_STATE;
    "Supported",            Supported,          ["supported", "k"],         SUPPORTED;
    "To",                   To,                 ["to", "t"],                TO;
    "User-Agent",           UserAgent,          ["user-agent"],             USER_AGENT;
    "Via",                  Via,                ["via", "v"],               VIA;
    "WWW-Authenticate",     WWWAuthenticate,    ["www-authenticate"],       WWW_AUTHENTICATE;
}

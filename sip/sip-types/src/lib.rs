#![forbid(unsafe_code)]
//! SIP message grammar used by the dialtone user agent.
//!
//! All parsers operate on `&str` slices of a shared [`bytes::Bytes`] buffer, values which
//! outlive parsing are kept as [`bytesstr::BytesStr`] views into that buffer.

macro_rules! impl_from_str {
    ($ty:ty) => {
        impl std::str::FromStr for $ty {
            type Err = crate::parse::ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let src = bytesstr::BytesStr::from(s);

                crate::parse::parse_complete(src.as_ref(), src.as_str(), <$ty as crate::parse::Parse>::parse)
            }
        }
    };
}

mod code;
pub mod header;
pub mod host;
mod method;
pub mod msg;
pub mod parse;
pub mod uri;

pub use code::{CodeKind, StatusCode};
pub use header::headers::Headers;
pub use header::name::Name;
pub use method::Method;

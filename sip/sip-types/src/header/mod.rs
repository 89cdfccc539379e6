//! Header names, the [`Headers`] map and typed header values
//!
//! [`Headers`]: crate::Headers

use bytes::Bytes;
use internal::IResult;
use name::Name;

mod error;
pub(crate) mod headers;
pub(crate) mod name;
pub mod typed;

pub use error::HeaderError;

/// Assign a constant header name to a type.
///
/// Used by the `*_named` functions of [`Headers`](crate::Headers) so no
/// name has to be provided by the caller.
pub trait ConstNamed {
    const NAME: Name;
}

/// Parse a typed header from a single header value.
///
/// Comma separated headers stop parsing at the next `,` and leave
/// it in the returned remainder.
pub trait HeaderParse: Sized {
    fn parse<'i>(src: &'i Bytes, i: &'i str) -> IResult<&'i str, Self>;
}

/// Implements [`HeaderParse`] for a type which implements `FromStr`, taking the full trimmed value
macro_rules! from_str_header {
    ($(#[$meta:meta])* $struct_name:ident, $header_name:expr, $from_str_ty:ty) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $struct_name(pub $from_str_ty);

        impl $crate::header::ConstNamed for $struct_name {
            const NAME: $crate::Name = $header_name;
        }

        impl $crate::header::HeaderParse for $struct_name {
            fn parse<'i>(_: &'i bytes::Bytes, i: &'i str) -> internal::IResult<&'i str, Self> {
                nom::combinator::map_res(internal::rest, |i: &str| i.trim().parse().map(Self))(i)
            }
        }

        impl std::fmt::Display for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                std::fmt::Display::fmt(&self.0, f)
            }
        }
    };
}

/// Implements [`HeaderParse`] for a `BytesStr` newtype, taking the full trimmed value
macro_rules! string_header {
    ($(#[$meta:meta])* $struct_name:ident, $header_name:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub struct $struct_name(pub bytesstr::BytesStr);

        impl $struct_name {
            pub fn new<S: Into<bytesstr::BytesStr>>(s: S) -> Self {
                Self(s.into())
            }
        }

        impl $crate::header::ConstNamed for $struct_name {
            const NAME: $crate::Name = $header_name;
        }

        impl $crate::header::HeaderParse for $struct_name {
            fn parse<'i>(src: &'i bytes::Bytes, i: &'i str) -> internal::IResult<&'i str, Self> {
                Ok(("", Self(bytesstr::BytesStr::from_parse(src, i.trim()))))
            }
        }

        impl std::fmt::Display for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

pub(crate) use {from_str_header, string_header};

//! Parser helpers shared between the dialtone crates.

mod ws;

use nom::error::VerboseError;

pub type IResult<I, O> = nom::IResult<I, O, VerboseError<I>>;
pub use nom::Finish;
pub use ws::{is_ws, ws};

/// Detach a parser error from its input so it can outlive the parsed buffer
pub fn verbose_error_to_owned(i: VerboseError<&str>) -> VerboseError<String> {
    VerboseError {
        errors: i
            .errors
            .into_iter()
            .map(|(i, kind)| (i.into(), kind))
            .collect(),
    }
}

/// Parser which consumes the remaining input
pub fn rest(i: &str) -> IResult<&str, &str> {
    Ok(("", i))
}

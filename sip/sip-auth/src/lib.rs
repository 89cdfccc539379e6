//! Client side SIP authentication

use sip_types::Headers;
use sip_types::msg::{RequestLine, StatusLine};
use std::error::Error;
use std::fmt::Debug;

mod digest;

pub use digest::{DigestAuthenticator, DigestCredentials, DigestError, DigestUser};

/// SIP request authenticator
pub trait ClientAuthenticator {
    type Error: Error + Debug;

    /// Add the authorization headers for all solved challenges to a request
    ///
    /// Does nothing before the first rejection was handled.
    fn authorize_request(&mut self, request: &mut Headers);

    /// Solve the challenges of a `401` / `407` response
    ///
    /// Returns an error when the request should not be sent again
    fn handle_rejection(
        &mut self,
        rejected_request: RequestParts<'_>,
        reject_response: ResponseParts<'_>,
    ) -> Result<(), Self::Error>;

    /// Forget all solved challenges
    fn reset(&mut self);
}

/// The request that was rejected
#[derive(Debug, Clone, Copy)]
pub struct RequestParts<'s> {
    pub line: &'s RequestLine,
    pub headers: &'s Headers,
    pub body: &'s [u8],
}

/// The response which rejected the request
#[derive(Debug, Clone, Copy)]
pub struct ResponseParts<'s> {
    pub line: &'s StatusLine,
    pub headers: &'s Headers,
    pub body: &'s [u8],
}

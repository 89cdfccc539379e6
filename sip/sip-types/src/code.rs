use std::fmt;
use std::str::FromStr;

/// SIP response status code
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct StatusCode(u16);

impl fmt::Debug for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut tuple = f.debug_tuple("StatusCode");
        tuple.field(&self.0);
        if let Some(text) = self.text() {
            tuple.field(&text);
        }
        tuple.finish()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Class of a [`StatusCode`]
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub enum CodeKind {
    /// 100..=199
    Provisional,
    /// 200..=299
    Success,
    /// 300..=399
    Redirection,
    /// 400..=499
    RequestFailure,
    /// 500..=599
    ServerFailure,
    /// 600..=699
    GlobalFailure,
    /// Anything outside of the ranges above
    Custom,
}

impl StatusCode {
    /// Returns the [`CodeKind`] of the code
    ///
    /// # Example
    ///
    /// ```
    /// use dialtone_sip_types::{CodeKind, StatusCode};
    ///
    /// assert_eq!(StatusCode::from(486).kind(), CodeKind::RequestFailure);
    /// ```
    #[inline]
    pub fn kind(self) -> CodeKind {
        match self.0 {
            100..=199 => CodeKind::Provisional,
            200..=299 => CodeKind::Success,
            300..=399 => CodeKind::Redirection,
            400..=499 => CodeKind::RequestFailure,
            500..=599 => CodeKind::ServerFailure,
            600..=699 => CodeKind::GlobalFailure,
            _ => CodeKind::Custom,
        }
    }

    /// Returns true for any response in 200..=699
    #[inline]
    pub fn is_final(self) -> bool {
        self.0 >= 200
    }

    pub fn into_u16(self) -> u16 {
        self.0
    }
}

impl FromStr for StatusCode {
    type Err = <u16 as FromStr>::Err;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(StatusCode(u16::from_str(s)?))
    }
}

impl From<u16> for StatusCode {
    fn from(code: u16) -> StatusCode {
        StatusCode(code)
    }
}

macro_rules! codes {
    ($([$code:expr => $name:ident, $text:literal];)*) => {
        impl StatusCode {
            /// Returns the default reason phrase of a known code
            pub fn text(self) -> Option<&'static str> {
                match self.0 {
                    $($code => Some($text),)*
                    _ => None
                }
            }

            $(
            pub const $name: StatusCode = StatusCode($code);
            )*
        }
    };
}

codes! {
    [100 => TRYING, "Trying"];
    [180 => RINGING, "Ringing"];
    [181 => CALL_IS_BEING_FORWARDED, "Call Is Being Forwarded"];
    [182 => QUEUED, "Queued"];
    [183 => SESSION_PROGRESS, "Session Progress"];

    [200 => OK, "OK"];
    [202 => ACCEPTED, "Accepted"];

    [300 => MULTIPLE_CHOICES, "Multiple Choices"];
    [301 => MOVED_PERMANENTLY, "Moved Permanently"];
    [302 => MOVED_TEMPORARILY, "Moved Temporarily"];

    [400 => BAD_REQUEST, "Bad Request"];
    [401 => UNAUTHORIZED, "Unauthorized"];
    [403 => FORBIDDEN, "Forbidden"];
    [404 => NOT_FOUND, "Not Found"];
    [405 => METHOD_NOT_ALLOWED, "Method Not Allowed"];
    [407 => PROXY_AUTHENTICATION_REQUIRED, "Proxy Authentication Required"];
    [408 => REQUEST_TIMEOUT, "Request Timeout"];
    [415 => UNSUPPORTED_MEDIA_TYPE, "Unsupported Media Type"];
    [423 => INTERVAL_TOO_BRIEF, "Interval Too Brief"];
    [480 => TEMPORARILY_UNAVAILABLE, "Temporarily Unavailable"];
    [481 => CALL_OR_TRANSACTION_DOES_NOT_EXIST, "Call/Transaction Does Not Exist"];
    [482 => LOOP_DETECTED, "Loop Detected"];
    [486 => BUSY_HERE, "Busy Here"];
    [487 => REQUEST_TERMINATED, "Request Terminated"];
    [488 => NOT_ACCEPTABLE_HERE, "Not Acceptable Here"];
    [491 => REQUEST_PENDING, "Request Pending"];

    [500 => SERVER_INTERNAL_ERROR, "Server Internal Error"];
    [501 => NOT_IMPLEMENTED, "Not Implemented"];
    [503 => SERVICE_UNAVAILABLE, "Service Unavailable"];
    [504 => SERVER_TIMEOUT, "Server Time-out"];

    [600 => BUSY_EVERYWHERE, "Busy Everywhere"];
    [603 => DECLINE, "Decline"];
}

use crate::Name;
use crate::header::{from_str_header, string_header};

from_str_header!(
    /// `Expires` header, in seconds
    Expires,
    Name::EXPIRES,
    u32
);

from_str_header!(
    /// `Min-Expires` header sent with `423 Interval Too Brief`
    MinExpires,
    Name::MIN_EXPIRES,
    u32
);

from_str_header!(MaxForwards, Name::MAX_FORWARDS, u32);

from_str_header!(ContentLength, Name::CONTENT_LENGTH, usize);

string_header!(
    /// `Content-Type` header, kept as the raw media type
    ContentType,
    Name::CONTENT_TYPE
);

string_header!(Event, Name::EVENT);

string_header!(SubscriptionState, Name::SUBSCRIPTION_STATE);

string_header!(UserAgent, Name::USER_AGENT);

string_header!(Server, Name::SERVER);

impl ContentType {
    /// Compare the media type, ignoring case and parameters
    pub fn is(&self, media_type: &str) -> bool {
        self.0
            .split(';')
            .next()
            .is_some_and(|ty| ty.trim().eq_ignore_ascii_case(media_type))
    }
}

//! Typed header values

mod auth;
mod call_id;
mod contact;
mod cseq;
mod from_to;
mod refer_to;
mod routing;
mod simple;
mod via;

pub use auth::{
    Algorithm, AuthChallenge, AuthResponse, DigestChallenge, DigestResponse, QopOption,
    QopResponse,
};
pub use call_id::CallID;
pub use contact::Contact;
pub use cseq::CSeq;
pub use from_to::FromTo;
pub use refer_to::ReferTo;
pub use routing::{RecordRoute, Route, Routing};
pub use simple::{
    ContentLength, ContentType, Event, Expires, MaxForwards, MinExpires, Server,
    SubscriptionState, UserAgent,
};
pub use via::Via;

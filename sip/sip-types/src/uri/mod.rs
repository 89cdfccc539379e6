//! SIP URIs and name-addr values

mod name_addr;
mod params;
mod sip;

pub use name_addr::NameAddr;
pub use params::{Param, Params};
pub use sip::SipUri;

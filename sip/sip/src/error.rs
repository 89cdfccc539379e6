use sip_core::TransportError;
use sip_ua::AgentError;
use std::io;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Agent(#[from] AgentError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("client is not started")]
    NotStarted,
    #[error("client is already started")]
    AlreadyStarted,
    #[error("failed to resolve {host}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },
    /// The reactor task ended unexpectedly, the client must be restarted
    #[error("reactor is gone")]
    ReactorGone,
    #[error("invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

use crate::AgentError;
use sip_auth::{DigestCredentials, DigestUser};
use sip_types::uri::{NameAddr, SipUri};
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 5060;

/// Registration interval requested when none is configured
pub const DEFAULT_REGISTRATION_INTERVAL: Duration = Duration::from_secs(900);

/// Identity and credentials used for registration and calls
#[derive(Debug, Clone)]
pub struct Account {
    pub username: String,
    pub domain: String,
    pub password: Option<String>,
    pub port: u16,
    /// Expiry requested in every REGISTER
    pub registration_interval: Duration,
    pub display_name: Option<String>,
}

impl Account {
    pub fn new<U, D>(username: U, domain: D) -> Self
    where
        U: Into<String>,
        D: Into<String>,
    {
        Self {
            username: username.into(),
            domain: domain.into(),
            password: None,
            port: DEFAULT_PORT,
            registration_interval: DEFAULT_REGISTRATION_INTERVAL,
            display_name: None,
        }
    }

    pub fn with_password<P: Into<String>>(mut self, password: P) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_registration_interval(mut self, interval: Duration) -> Self {
        self.registration_interval = interval;
        self
    }

    pub fn with_display_name<N: Into<String>>(mut self, name: N) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Address of record, `sip:username@domain`
    pub fn aor(&self) -> Result<SipUri, AgentError> {
        if self.username.is_empty() || self.domain.is_empty() {
            return Err(AgentError::InvalidUri(format!(
                "{}@{}",
                self.username, self.domain
            )));
        }

        parse_uri(&format!("sip:{}@{}", self.username, self.domain))
    }

    /// Request URI of REGISTER requests, `sip:domain`
    pub fn registrar(&self) -> Result<SipUri, AgentError> {
        parse_uri(&format!("sip:{}", self.domain))
    }

    /// The address of record with the display name, used in `From` headers
    pub fn identity(&self) -> Result<NameAddr, AgentError> {
        let aor = self.aor()?;

        Ok(match &self.display_name {
            Some(name) => NameAddr::new(name.as_str(), aor),
            None => NameAddr::uri(aor),
        })
    }

    pub(crate) fn credentials(&self) -> DigestCredentials {
        let mut credentials = DigestCredentials::new();
        credentials.set_default(self.digest_user());
        credentials
    }

    pub(crate) fn digest_user(&self) -> DigestUser {
        DigestUser::new(
            self.username.as_str(),
            self.password.as_deref().unwrap_or_default(),
        )
    }
}

/// Parse a user supplied target, `sip:` is assumed when the scheme is missing
pub fn parse_uri(uri: &str) -> Result<SipUri, AgentError> {
    let trimmed = uri.trim();

    if trimmed.is_empty() {
        return Err(AgentError::InvalidUri(uri.into()));
    }

    let with_scheme = if trimmed.starts_with("sip:") || trimmed.starts_with("sips:") {
        trimmed.to_owned()
    } else {
        format!("sip:{trimmed}")
    };

    with_scheme
        .parse()
        .map_err(|_| AgentError::InvalidUri(uri.into()))
}

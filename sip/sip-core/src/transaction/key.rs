use super::consts::RFC3261_BRANCH_PREFIX;
use crate::BaseHeaders;
use bytesstr::BytesStr;
use sip_types::Method;
use std::fmt;

/// Transaction key, used to match a message to an ongoing transaction
///
/// Can be generated new or created from an incoming message.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct TsxKey {
    role: Role,
    branch: BytesStr,
    method: Option<Method>,
}

#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq)]
enum Role {
    Server,
    Client,
}

impl fmt::Display for TsxKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.role {
            Role::Server => write!(f, "server:")?,
            Role::Client => write!(f, "client:")?,
        }

        let method = self.method.as_ref().unwrap_or(&Method::INVITE);

        write!(f, "{}:{}", self.branch, method)
    }
}

// invite and ack are represented as None
// to match transaction-level ACK-requests to invite transactions
fn filter_method(method: &Method) -> Option<Method> {
    Some(method)
        .filter(|&m| !(matches!(m, &Method::INVITE | &Method::ACK)))
        .cloned()
}

impl TsxKey {
    pub fn is_server(&self) -> bool {
        self.role == Role::Server
    }

    pub fn is_invite(&self) -> bool {
        self.method.is_none()
    }

    pub fn branch(&self) -> &BytesStr {
        &self.branch
    }

    /// Method of the transaction, `None` for INVITE
    pub fn method(&self) -> Option<&Method> {
        self.method.as_ref()
    }

    pub(crate) fn client(method: &Method) -> Self {
        Self {
            role: Role::Client,
            branch: generate_branch(),
            method: filter_method(method),
        }
    }

    /// Key of the CANCEL transaction for this INVITE transaction, sharing its branch
    pub(crate) fn cancel(&self) -> Self {
        Self {
            role: self.role,
            branch: self.branch.clone(),
            method: Some(Method::CANCEL),
        }
    }

    /// Key of a received request
    pub fn server(headers: &BaseHeaders) -> Self {
        Self::from_headers(headers, Role::Server)
    }

    /// Key of a received response
    pub fn client_from_response(headers: &BaseHeaders) -> Self {
        Self::from_headers(headers, Role::Client)
    }

    fn from_headers(headers: &BaseHeaders, role: Role) -> Self {
        let method = filter_method(&headers.cseq.method);

        let branch = match headers.top_via.branch() {
            Some(branch) if branch.starts_with(RFC3261_BRANCH_PREFIX) => branch.clone(),
            // pre RFC 3261 peers, fall back to the identifiers of the request itself
            branch => BytesStr::from(format!(
                "{}:{}:{}:{}",
                branch.map(BytesStr::as_str).unwrap_or_default(),
                headers.call_id.0,
                headers.cseq.cseq,
                headers.from.tag.as_deref().unwrap_or_default(),
            )),
        };

        Self {
            role,
            branch,
            method,
        }
    }
}

pub(crate) fn generate_branch() -> BytesStr {
    use rand::distr::Alphanumeric;
    use rand::{Rng, rng};

    RFC3261_BRANCH_PREFIX
        .bytes()
        .chain(rng().sample_iter(Alphanumeric).take(23))
        .map(char::from)
        .collect::<String>()
        .into()
}

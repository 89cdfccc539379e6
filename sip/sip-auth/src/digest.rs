use crate::{ClientAuthenticator, RequestParts, ResponseParts};
use bytesstr::BytesStr;
use sha2::Digest;
use sip_types::Name;
use sip_types::header::HeaderError;
use sip_types::header::typed::{
    Algorithm, AuthChallenge, DigestChallenge, DigestResponse, QopOption, QopResponse,
};
use sip_types::Headers;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum DigestError {
    #[error("failed to authenticate realms: {0:?}")]
    FailedToAuthenticate(Vec<BytesStr>),
    #[error("encountered unsupported algorithm {0}")]
    UnsupportedAlgorithm(Algorithm),
    #[error("missing credentials for realm {0}")]
    MissingCredentials(BytesStr),
    #[error("unsupported qop")]
    UnsupportedQop,
    #[error("response contained no digest challenge")]
    NoChallenge,
    #[error(transparent)]
    Header(#[from] HeaderError),
}

/// Credentials mapped to their realm
///
/// Default credentials are used for realms without explicit credentials.
#[derive(Default, Clone)]
pub struct DigestCredentials {
    default: Option<DigestUser>,
    map: HashMap<String, DigestUser>,
}

impl DigestCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_default(&mut self, credentials: DigestUser) {
        self.default = Some(credentials)
    }

    pub fn add_for_realm<R: Into<String>>(&mut self, realm: R, credentials: DigestUser) {
        self.map.insert(realm.into(), credentials);
    }

    /// Returns the credentials for `realm`, falling back to the default ones
    pub fn get_for_realm(&self, realm: &str) -> Option<&DigestUser> {
        self.map.get(realm).or(self.default.as_ref())
    }

    pub fn remove_for_realm(&mut self, realm: &str) {
        self.map.remove(realm);
    }
}

#[derive(Clone)]
pub struct DigestUser {
    user: String,
    password: Vec<u8>,
}

impl DigestUser {
    pub fn new<U, P>(user: U, password: P) -> Self
    where
        U: Into<String>,
        P: Into<Vec<u8>>,
    {
        Self {
            user: user.into(),
            password: password.into(),
        }
    }
}

type HashFn = fn(&[u8]) -> String;

/// Values kept to recompute a qop response with the next nonce-count
struct QopEntry {
    ha1: String,
    ha2: String,
    hash: HashFn,
}

/// A solved challenge, reused for every following request
struct ResponseEntry {
    realm: BytesStr,
    header: DigestResponse,
    qop: Option<QopEntry>,
    use_count: u32,
    is_proxy: bool,
}

/// Solves digest challenges of `401` / `407` responses (RFC 2617, RFC 7616, RFC 8760)
pub struct DigestAuthenticator {
    pub credentials: DigestCredentials,
    responses: Vec<ResponseEntry>,

    /// Respond with qop `auth` even if the challenge offers no qop (RFC 8760 Section 2.6)
    pub enforce_qop: bool,
    /// Refuse challenges using MD5
    pub reject_md5: bool,
}

impl ClientAuthenticator for DigestAuthenticator {
    type Error = DigestError;

    fn authorize_request(&mut self, request_headers: &mut Headers) {
        for entry in &mut self.responses {
            let name = if entry.is_proxy {
                Name::PROXY_AUTHORIZATION
            } else {
                Name::AUTHORIZATION
            };

            if entry.use_count > 0 {
                if let (Some(qop_response), Some(qop)) =
                    (&mut entry.header.qop_response, &entry.qop)
                {
                    qop_response.nc += 1;

                    entry.header.response = (qop.hash)(
                        format!(
                            "{}:{}:{:08x}:{}:{}:{}",
                            qop.ha1,
                            entry.header.nonce,
                            qop_response.nc,
                            qop_response.cnonce,
                            qop_response.qop,
                            qop.ha2
                        )
                        .as_bytes(),
                    )
                    .into();
                }
            }

            entry.use_count += 1;

            request_headers.insert(name, format!("{}", entry.header));
        }
    }

    fn handle_rejection(
        &mut self,
        rejected_request: RequestParts<'_>,
        reject_response: ResponseParts<'_>,
    ) -> Result<(), DigestError> {
        let mut challenges = vec![];

        for (is_proxy, name) in [
            (false, Name::WWW_AUTHENTICATE),
            (true, Name::PROXY_AUTHENTICATE),
        ] {
            for value in reject_response.headers.get_all::<AuthChallenge>(name)? {
                if let AuthChallenge::Digest(challenge) = value {
                    challenges.push((is_proxy, challenge));
                }
            }
        }

        if challenges.is_empty() {
            return Err(DigestError::NoChallenge);
        }

        let mut failed_realms: Vec<BytesStr> = vec![];
        let mut solved_realms: Vec<BytesStr> = vec![];

        // Only the topmost supported challenge per realm is answered (RFC 8760 Section 2.4)
        for (is_proxy, challenge) in challenges {
            if solved_realms.contains(&challenge.realm) {
                continue;
            }

            let realm = challenge.realm.clone();

            match self.handle_challenge(rejected_request, challenge) {
                Ok((header, qop)) => {
                    failed_realms.retain(|failed| failed != &realm);
                    self.responses.retain(|entry| entry.realm != realm);
                    self.responses.push(ResponseEntry {
                        realm: realm.clone(),
                        header,
                        qop,
                        use_count: 0,
                        is_proxy,
                    });
                    solved_realms.push(realm);
                }
                Err(e) => {
                    log::warn!("failed to handle digest challenge for {realm}, {e}");

                    if !failed_realms.contains(&realm) {
                        failed_realms.push(realm);
                    }
                }
            }
        }

        if !failed_realms.is_empty() {
            return Err(DigestError::FailedToAuthenticate(failed_realms));
        }

        Ok(())
    }

    fn reset(&mut self) {
        self.responses.clear();
    }
}

impl DigestAuthenticator {
    pub fn new(credentials: DigestCredentials) -> Self {
        Self {
            credentials,
            responses: vec![],
            enforce_qop: false,
            reject_md5: false,
        }
    }

    /// Rotate the default credentials, solved challenges are dropped as they were computed
    /// with the old password
    pub fn set_default_credentials(&mut self, user: DigestUser) {
        self.credentials.set_default(user);
        self.responses.clear();
    }

    fn handle_challenge(
        &self,
        request: RequestParts<'_>,
        challenge: DigestChallenge,
    ) -> Result<(DigestResponse, Option<QopEntry>), DigestError> {
        // A challenge repeating the nonce we already answered means the credentials were refused.
        // Servers which require a fresh nonce without setting stale are handled by comparing nonces.
        if let Some(previous) = self
            .responses
            .iter()
            .find(|entry| entry.realm == challenge.realm)
        {
            if previous.header.nonce == challenge.nonce && !challenge.stale {
                return Err(DigestError::FailedToAuthenticate(vec![challenge.realm]));
            }
        }

        let (hash, is_session): (HashFn, bool) = match &challenge.algorithm {
            Algorithm::MD5 | Algorithm::MD5Sess if self.reject_md5 => {
                return Err(DigestError::UnsupportedAlgorithm(challenge.algorithm.clone()));
            }
            Algorithm::MD5 => (hash_md5, false),
            Algorithm::MD5Sess => (hash_md5, true),
            Algorithm::SHA256 => (hash_sha256, false),
            Algorithm::SHA256Sess => (hash_sha256, true),
            Algorithm::SHA512256 => (hash_sha512_trunc256, false),
            Algorithm::SHA512256Sess => (hash_sha512_trunc256, true),
            Algorithm::Other(_) => {
                return Err(DigestError::UnsupportedAlgorithm(challenge.algorithm.clone()));
            }
        };

        self.digest_respond(challenge, request, is_session, hash)
    }

    fn digest_respond(
        &self,
        mut challenge: DigestChallenge,
        request: RequestParts<'_>,
        is_session: bool,
        hash: HashFn,
    ) -> Result<(DigestResponse, Option<QopEntry>), DigestError> {
        let user = self
            .credentials
            .get_for_realm(&challenge.realm)
            .ok_or_else(|| DigestError::MissingCredentials(challenge.realm.clone()))?;

        let cnonce = BytesStr::from(uuid::Uuid::new_v4().simple().to_string());

        let mut ha1 = hash(
            [
                format!("{}:{}:", user.user, challenge.realm).as_bytes(),
                &user.password,
            ]
            .concat()
            .as_slice(),
        );

        if is_session {
            ha1 = hash(format!("{}:{}:{}", ha1, challenge.nonce, cnonce).as_bytes());
        }

        let method = &request.line.method;
        let uri = request.line.uri.to_string();

        if challenge.qop.is_empty() && self.enforce_qop {
            challenge.qop.push(QopOption::Auth)
        }

        let (response, qop) = if challenge.qop.is_empty() {
            let ha2 = hash(format!("{method}:{uri}").as_bytes());

            (
                hash(format!("{}:{}:{}", ha1, challenge.nonce, ha2).as_bytes()),
                None,
            )
        } else {
            let (qop, ha2) = if challenge.qop.contains(&QopOption::Auth) {
                (QopOption::Auth, hash(format!("{method}:{uri}").as_bytes()))
            } else if challenge.qop.contains(&QopOption::AuthInt) {
                let body_hash = hash(request.body);

                (
                    QopOption::AuthInt,
                    hash(format!("{method}:{uri}:{body_hash}").as_bytes()),
                )
            } else {
                return Err(DigestError::UnsupportedQop);
            };

            let nc = 1;

            let response = hash(
                format!(
                    "{}:{}:{:08x}:{}:{}:{}",
                    ha1, challenge.nonce, nc, cnonce, qop, ha2
                )
                .as_bytes(),
            );

            let qop_response = QopResponse { qop, cnonce, nc };

            (response, Some((qop_response, QopEntry { ha1, ha2, hash })))
        };

        let username = if challenge.userhash {
            // RFC 7616 Section 3.4.4
            hash(format!("{}:{}", user.user, challenge.realm).as_bytes()).into()
        } else {
            BytesStr::from(user.user.as_str())
        };

        let (qop_response, qop_entry) = match qop {
            Some((qop_response, qop_entry)) => (Some(qop_response), Some(qop_entry)),
            None => (None, None),
        };

        Ok((
            DigestResponse {
                username,
                realm: challenge.realm,
                nonce: challenge.nonce,
                uri: uri.into(),
                response: response.into(),
                algorithm: challenge.algorithm,
                opaque: challenge.opaque,
                qop_response,
                userhash: challenge.userhash,
            },
            qop_entry,
        ))
    }
}

fn hash_md5(i: &[u8]) -> String {
    format!("{:x}", md5::compute(i))
}

fn hash_sha256(i: &[u8]) -> String {
    let mut hasher = sha2::Sha256::new();
    hasher.update(i);
    format!("{:x}", hasher.finalize())
}

fn hash_sha512_trunc256(i: &[u8]) -> String {
    let mut hasher = sha2::Sha512_256::new();
    hasher.update(i);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod test {
    use super::*;
    use sip_types::header::typed::AuthResponse;
    use sip_types::msg::{RequestLine, StatusLine};
    use sip_types::uri::SipUri;
    use sip_types::{Method, StatusCode};

    fn test_authenticator() -> DigestAuthenticator {
        let mut credentials = DigestCredentials::new();

        credentials.add_for_realm("example.org", DigestUser::new("user123", "password123"));

        DigestAuthenticator::new(credentials)
    }

    fn challenge(qop: Vec<QopOption>) -> Headers {
        let mut headers = Headers::new();

        headers.insert_type(
            Name::WWW_AUTHENTICATE,
            &AuthChallenge::Digest(DigestChallenge {
                realm: "example.org".into(),
                domain: None,
                nonce: "YWmh5GFpoLjiTDCA1hTSSygkgdj99aHE".into(),
                opaque: None,
                stale: false,
                algorithm: Algorithm::MD5,
                qop,
                userhash: false,
            }),
        );

        headers
    }

    fn reject(authenticator: &mut DigestAuthenticator, headers: &Headers) -> Result<(), DigestError> {
        let line = RequestLine {
            method: Method::REGISTER,
            uri: "sip:example.org".parse::<SipUri>().unwrap(),
        };

        authenticator.handle_rejection(
            RequestParts {
                line: &line,
                headers: &Headers::new(),
                body: &[],
            },
            ResponseParts {
                line: &StatusLine {
                    code: StatusCode::UNAUTHORIZED,
                    reason: None,
                },
                headers,
                body: &[],
            },
        )
    }

    fn authorization(authenticator: &mut DigestAuthenticator) -> DigestResponse {
        let mut headers = Headers::new();
        authenticator.authorize_request(&mut headers);

        match headers.get::<AuthResponse>(Name::AUTHORIZATION).unwrap() {
            AuthResponse::Digest(digest) => digest,
            AuthResponse::Other { .. } => panic!("expected digest"),
        }
    }

    #[test]
    fn digest_challenge() {
        let mut authenticator = test_authenticator();

        reject(&mut authenticator, &challenge(vec![])).unwrap();

        let response = authorization(&mut authenticator);

        assert_eq!(response.username, "user123");
        assert_eq!(response.realm, "example.org");
        assert_eq!(response.nonce, "YWmh5GFpoLjiTDCA1hTSSygkgdj99aHE");
        assert_eq!(response.uri, "sip:example.org");
        assert_eq!(response.response, "bc185e4893f17f12dc53153d2a62e6a6");
        assert_eq!(response.algorithm, Algorithm::MD5);
        assert_eq!(response.qop_response, None);
    }

    #[test]
    fn qop_nonce_count_increments() {
        let mut authenticator = test_authenticator();

        reject(&mut authenticator, &challenge(vec![QopOption::Auth])).unwrap();

        let first = authorization(&mut authenticator);
        let second = authorization(&mut authenticator);

        assert_eq!(first.qop_response.as_ref().unwrap().nc, 1);
        assert_eq!(second.qop_response.as_ref().unwrap().nc, 2);
        assert_ne!(first.response, second.response);
    }

    #[test]
    fn repeated_nonce_fails() {
        let mut authenticator = test_authenticator();

        reject(&mut authenticator, &challenge(vec![])).unwrap();

        assert!(matches!(
            reject(&mut authenticator, &challenge(vec![])),
            Err(DigestError::FailedToAuthenticate(..))
        ));
    }

    #[test]
    fn missing_challenge() {
        let mut authenticator = test_authenticator();

        assert!(matches!(
            reject(&mut authenticator, &Headers::new()),
            Err(DigestError::NoChallenge)
        ));
    }

    #[test]
    fn reset_forgets_responses() {
        let mut authenticator = test_authenticator();

        reject(&mut authenticator, &challenge(vec![])).unwrap();
        authenticator.reset();

        let mut headers = Headers::new();
        authenticator.authorize_request(&mut headers);

        assert!(!headers.contains(&Name::AUTHORIZATION));
    }

    #[test]
    fn rotated_credentials() {
        let mut authenticator = DigestAuthenticator::new(DigestCredentials::new());

        assert!(matches!(
            reject(&mut authenticator, &challenge(vec![])),
            Err(DigestError::FailedToAuthenticate(..))
        ));

        authenticator.set_default_credentials(DigestUser::new("user123", "password123"));
        reject(&mut authenticator, &challenge(vec![])).unwrap();

        assert_eq!(
            authorization(&mut authenticator).response,
            "bc185e4893f17f12dc53153d2a62e6a6"
        );
    }
}

use crate::header::HeaderParse;
use crate::parse::{parse_quoted, token, whitespace};
use bytes::Bytes;
use bytesstr::BytesStr;
use internal::{IResult, ws};
use nom::branch::alt;
use nom::bytes::complete::{tag, take_while, take_while1};
use nom::combinator::{map, map_res};
use nom::multi::separated_list0;
use nom::sequence::separated_pair;
use std::fmt;

/// Digest hash algorithm
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Algorithm {
    MD5,
    MD5Sess,
    SHA256,
    SHA256Sess,
    SHA512256,
    SHA512256Sess,
    Other(BytesStr),
}

impl Algorithm {
    fn from_parse(src: &Bytes, i: &str) -> Self {
        match i {
            _ if i.eq_ignore_ascii_case("MD5") => Self::MD5,
            _ if i.eq_ignore_ascii_case("MD5-sess") => Self::MD5Sess,
            _ if i.eq_ignore_ascii_case("SHA-256") => Self::SHA256,
            _ if i.eq_ignore_ascii_case("SHA-256-sess") => Self::SHA256Sess,
            _ if i.eq_ignore_ascii_case("SHA-512-256") => Self::SHA512256,
            _ if i.eq_ignore_ascii_case("SHA-512-256-sess") => Self::SHA512256Sess,
            other => Self::Other(BytesStr::from_parse(src, other)),
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Algorithm::MD5 => f.write_str("MD5"),
            Algorithm::MD5Sess => f.write_str("MD5-sess"),
            Algorithm::SHA256 => f.write_str("SHA-256"),
            Algorithm::SHA256Sess => f.write_str("SHA-256-sess"),
            Algorithm::SHA512256 => f.write_str("SHA-512-256"),
            Algorithm::SHA512256Sess => f.write_str("SHA-512-256-sess"),
            Algorithm::Other(other) => f.write_str(other),
        }
    }
}

/// Quality of protection offered by a challenge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QopOption {
    Auth,
    AuthInt,
    Other(BytesStr),
}

impl QopOption {
    fn from_parse(src: &Bytes, i: &str) -> Self {
        match i {
            _ if i.eq_ignore_ascii_case("auth") => Self::Auth,
            _ if i.eq_ignore_ascii_case("auth-int") => Self::AuthInt,
            other => Self::Other(BytesStr::from_parse(src, other)),
        }
    }
}

impl fmt::Display for QopOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QopOption::Auth => f.write_str("auth"),
            QopOption::AuthInt => f.write_str("auth-int"),
            QopOption::Other(other) => f.write_str(other),
        }
    }
}

/// Digest challenge found in `WWW-Authenticate` and `Proxy-Authenticate` headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestChallenge {
    pub realm: BytesStr,
    pub domain: Option<BytesStr>,
    pub nonce: BytesStr,
    pub opaque: Option<BytesStr>,
    pub stale: bool,
    pub algorithm: Algorithm,
    pub qop: Vec<QopOption>,
    pub userhash: bool,
}

/// Value of `WWW-Authenticate` and `Proxy-Authenticate` headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthChallenge {
    Digest(DigestChallenge),
    Other { scheme: BytesStr, params: BytesStr },
}

/// The qop fields of a digest response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QopResponse {
    pub qop: QopOption,
    pub cnonce: BytesStr,
    pub nc: u32,
}

/// Digest response found in `Authorization` and `Proxy-Authorization` headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DigestResponse {
    pub username: BytesStr,
    pub realm: BytesStr,
    pub nonce: BytesStr,
    pub uri: BytesStr,
    pub response: BytesStr,
    pub algorithm: Algorithm,
    pub opaque: Option<BytesStr>,
    pub qop_response: Option<QopResponse>,
    pub userhash: bool,
}

/// Value of `Authorization` and `Proxy-Authorization` headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthResponse {
    Digest(DigestResponse),
    Other { scheme: BytesStr, params: BytesStr },
}

fn auth_param(i: &str) -> IResult<&str, (&str, &str)> {
    map(
        ws((
            take_while1(token),
            tag("="),
            alt((parse_quoted, take_while1(|c| token(c) || matches!(c, '/' | ':')))),
        )),
        |(name, _, value)| (name, value),
    )(i)
}

fn auth_params(i: &str) -> IResult<&str, Vec<(&str, &str)>> {
    separated_list0(ws((tag(","),)), auth_param)(i)
}

/// `scheme param=value, ...` with the scheme and the remaining parameter list
fn scheme_and_params(i: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(take_while1(token), take_while(whitespace), internal::rest)(i.trim_start())
}

fn find<'p>(params: &[(&str, &'p str)], name: &str) -> Option<&'p str> {
    params
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| *v)
}

impl DigestChallenge {
    fn from_params(src: &Bytes, params: &[(&str, &str)]) -> Result<Self, &'static str> {
        let realm = find(params, "realm").ok_or("missing realm")?;
        let nonce = find(params, "nonce").ok_or("missing nonce")?;

        Ok(DigestChallenge {
            realm: BytesStr::from_parse(src, realm),
            domain: find(params, "domain").map(|d| BytesStr::from_parse(src, d)),
            nonce: BytesStr::from_parse(src, nonce),
            opaque: find(params, "opaque").map(|o| BytesStr::from_parse(src, o)),
            stale: find(params, "stale").is_some_and(|s| s.eq_ignore_ascii_case("true")),
            algorithm: find(params, "algorithm")
                .map(|a| Algorithm::from_parse(src, a))
                .unwrap_or(Algorithm::MD5),
            qop: find(params, "qop")
                .map(|qop| {
                    qop.split(',')
                        .map(str::trim)
                        .filter(|qop| !qop.is_empty())
                        .map(|qop| QopOption::from_parse(src, qop))
                        .collect()
                })
                .unwrap_or_default(),
            userhash: find(params, "userhash").is_some_and(|s| s.eq_ignore_ascii_case("true")),
        })
    }
}

impl DigestResponse {
    fn from_params(src: &Bytes, params: &[(&str, &str)]) -> Result<Self, &'static str> {
        let required = |name| {
            find(params, name)
                .map(|v| BytesStr::from_parse(src, v))
                .ok_or("missing required digest response parameter")
        };

        let qop_response = match find(params, "qop") {
            Some(qop) => Some(QopResponse {
                qop: QopOption::from_parse(src, qop),
                cnonce: required("cnonce")?,
                nc: u32::from_str_radix(find(params, "nc").ok_or("missing nc")?, 16)
                    .map_err(|_| "invalid nc")?,
            }),
            None => None,
        };

        Ok(DigestResponse {
            username: required("username")?,
            realm: required("realm")?,
            nonce: required("nonce")?,
            uri: required("uri")?,
            response: required("response")?,
            algorithm: find(params, "algorithm")
                .map(|a| Algorithm::from_parse(src, a))
                .unwrap_or(Algorithm::MD5),
            opaque: find(params, "opaque").map(|o| BytesStr::from_parse(src, o)),
            qop_response,
            userhash: find(params, "userhash").is_some_and(|s| s.eq_ignore_ascii_case("true")),
        })
    }
}

impl HeaderParse for AuthChallenge {
    fn parse<'i>(src: &'i Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let (rem, (scheme, params)) = scheme_and_params(i)?;

        if scheme.eq_ignore_ascii_case("Digest") {
            let (_, digest) = map_res(auth_params, |params| {
                DigestChallenge::from_params(src, &params)
            })(params)?;

            Ok((rem, AuthChallenge::Digest(digest)))
        } else {
            Ok((
                rem,
                AuthChallenge::Other {
                    scheme: BytesStr::from_parse(src, scheme),
                    params: BytesStr::from_parse(src, params.trim()),
                },
            ))
        }
    }
}

impl HeaderParse for AuthResponse {
    fn parse<'i>(src: &'i Bytes, i: &'i str) -> IResult<&'i str, Self> {
        let (rem, (scheme, params)) = scheme_and_params(i)?;

        if scheme.eq_ignore_ascii_case("Digest") {
            let (_, digest) = map_res(auth_params, |params| {
                DigestResponse::from_params(src, &params)
            })(params)?;

            Ok((rem, AuthResponse::Digest(digest)))
        } else {
            Ok((
                rem,
                AuthResponse::Other {
                    scheme: BytesStr::from_parse(src, scheme),
                    params: BytesStr::from_parse(src, params.trim()),
                },
            ))
        }
    }
}

impl fmt::Display for DigestChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest realm=\"{}\"", self.realm)?;

        if let Some(domain) = &self.domain {
            write!(f, ", domain=\"{domain}\"")?;
        }

        write!(f, ", nonce=\"{}\"", self.nonce)?;

        if let Some(opaque) = &self.opaque {
            write!(f, ", opaque=\"{opaque}\"")?;
        }

        if self.stale {
            f.write_str(", stale=true")?;
        }

        write!(f, ", algorithm={}", self.algorithm)?;

        if !self.qop.is_empty() {
            let qop: Vec<String> = self.qop.iter().map(ToString::to_string).collect();
            write!(f, ", qop=\"{}\"", qop.join(","))?;
        }

        if self.userhash {
            f.write_str(", userhash=true")?;
        }

        Ok(())
    }
}

impl fmt::Display for AuthChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthChallenge::Digest(digest) => digest.fmt(f),
            AuthChallenge::Other { scheme, params } => write!(f, "{scheme} {params}"),
        }
    }
}

impl fmt::Display for DigestResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\", response=\"{}\", algorithm={}",
            self.username, self.realm, self.nonce, self.uri, self.response, self.algorithm
        )?;

        if let Some(opaque) = &self.opaque {
            write!(f, ", opaque=\"{opaque}\"")?;
        }

        if let Some(qop_response) = &self.qop_response {
            write!(
                f,
                ", qop={}, cnonce=\"{}\", nc={:08x}",
                qop_response.qop, qop_response.cnonce, qop_response.nc
            )?;
        }

        if self.userhash {
            f.write_str(", userhash=true")?;
        }

        Ok(())
    }
}

impl fmt::Display for AuthResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthResponse::Digest(digest) => digest.fmt(f),
            AuthResponse::Other { scheme, params } => write!(f, "{scheme} {params}"),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{Headers, Name};

    #[test]
    fn digest_challenge() {
        let mut headers = Headers::new();
        headers.insert(
            Name::WWW_AUTHENTICATE,
            "Digest realm=\"atlanta.example.com\", qop=\"auth,auth-int\", nonce=\"ea9c8e88df84f1cec4341ae6cbe5a359\", opaque=\"\", stale=FALSE, algorithm=MD5",
        );

        let challenge: AuthChallenge = headers.get(Name::WWW_AUTHENTICATE).unwrap();

        let AuthChallenge::Digest(digest) = challenge else {
            panic!("expected digest challenge");
        };

        assert_eq!(digest.realm, "atlanta.example.com");
        assert_eq!(digest.nonce, "ea9c8e88df84f1cec4341ae6cbe5a359");
        assert_eq!(digest.qop, vec![QopOption::Auth, QopOption::AuthInt]);
        assert_eq!(digest.algorithm, Algorithm::MD5);
        assert!(!digest.stale);
    }

    #[test]
    fn digest_challenge_missing_nonce() {
        let mut headers = Headers::new();
        headers.insert(Name::PROXY_AUTHENTICATE, "Digest realm=\"example.com\"");

        assert!(headers.get::<AuthChallenge>(Name::PROXY_AUTHENTICATE).is_err());
    }

    #[test]
    fn digest_response_print_parse() {
        let response = DigestResponse {
            username: "bob".into(),
            realm: "biloxi.com".into(),
            nonce: "dcd98b7102dd2f0e8b11d0f600bfb0c093".into(),
            uri: "sip:bob@biloxi.com".into(),
            response: "245f23415f11432b3434341c022".into(),
            algorithm: Algorithm::MD5,
            opaque: None,
            qop_response: Some(QopResponse {
                qop: QopOption::Auth,
                cnonce: "0a4f113b".into(),
                nc: 1,
            }),
            userhash: false,
        };

        let mut headers = Headers::new();
        headers.insert_type(Name::AUTHORIZATION, &AuthResponse::Digest(response.clone()));

        let parsed: AuthResponse = headers.get(Name::AUTHORIZATION).unwrap();

        assert_eq!(parsed, AuthResponse::Digest(response));
    }
}

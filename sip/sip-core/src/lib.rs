//! Transport and transaction layer of the dialtone SIP user agent
//!
//! Transports move raw bytes, everything above them is sans-IO: [`Transactions`] consumes
//! parsed messages and the current time and produces [`Transmit`]s and [`TsxEvent`]s, which
//! lets the owner drive it from a single reactor loop.

use bytes::{BufMut, Bytes, BytesMut};
use internal::Finish;
use sip_types::header::typed::{CSeq, CallID, ContentLength, FromTo, Via};
use sip_types::msg::{HeadLines, Line, MessageLine, RequestLine, StatusLine};
use sip_types::parse::Parse;
use sip_types::uri::SipUri;
use sip_types::{Headers, Method, Name, StatusCode};
use std::fmt;
use std::fmt::Write;
use std::str::from_utf8;

mod error;
pub mod timer;
pub mod transaction;
pub mod transport;

pub use error::{ParseError, TransportError};
pub use transaction::{IncomingRequest, TimerConfig, Transactions, Transmit, TsxEvent, TsxKey};

/// Basic request
#[derive(Debug, Clone)]
pub struct Request {
    pub line: RequestLine,
    pub headers: Headers,
    pub body: Bytes,
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.line.fmt(f)
    }
}

impl Request {
    /// Create an empty request
    pub fn new(method: Method, uri: SipUri) -> Self {
        Self {
            line: RequestLine { method, uri },
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    pub fn method(&self) -> &Method {
        &self.line.method
    }

    /// Create a response to this request, copying the headers mandated by RFC 3261 section 8.2.6
    ///
    /// The `To` tag must be added by the caller if the response creates or lives inside a dialog.
    pub fn create_response(&self, code: StatusCode, reason: Option<&str>) -> Response {
        let mut headers = Headers::with_capacity(6);

        for name in [Name::VIA, Name::FROM, Name::TO, Name::CALL_ID, Name::CSEQ] {
            for value in self.headers.values(&name) {
                headers.insert(name.clone(), value.clone());
            }
        }

        Response {
            line: StatusLine {
                code,
                reason: reason.map(Into::into),
            },
            headers,
            body: Bytes::new(),
        }
    }

    pub fn print(&self) -> Bytes {
        print_message(&self.line, &self.headers, &self.body)
    }
}

/// Basic response
#[derive(Debug, Clone)]
pub struct Response {
    pub line: StatusLine,
    pub headers: Headers,
    pub body: Bytes,
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.line.fmt(f)
    }
}

impl Response {
    pub fn code(&self) -> StatusCode {
        self.line.code
    }

    pub fn print(&self) -> Bytes {
        print_message(&self.line, &self.headers, &self.body)
    }
}

/// Parsed incoming message
#[derive(Debug, Clone)]
pub enum Message {
    Request(Request),
    Response(Response),
}

impl Message {
    pub fn headers(&self) -> &Headers {
        match self {
            Message::Request(request) => &request.headers,
            Message::Response(response) => &response.headers,
        }
    }
}

/// Headers every message must carry to be processed at all
#[derive(Debug, Clone)]
pub struct BaseHeaders {
    pub top_via: Via,
    pub from: FromTo,
    pub to: FromTo,
    pub call_id: CallID,
    pub cseq: CSeq,
}

impl BaseHeaders {
    pub fn extract_from(headers: &Headers) -> Result<Self, ParseError> {
        Ok(BaseHeaders {
            top_via: headers.get_named()?,
            from: headers.get(Name::FROM)?,
            to: headers.get(Name::TO)?,
            call_id: headers.get_named()?,
            cseq: headers.get_named()?,
        })
    }
}

fn print_message<L: fmt::Display>(line: &L, headers: &Headers, body: &Bytes) -> Bytes {
    let mut head = String::with_capacity(512);

    // writing to a String never fails
    let _ = write!(head, "{line}\r\n");

    for (name, value) in headers.iter() {
        if *name == Name::CONTENT_LENGTH {
            continue;
        }

        let _ = write!(head, "{name}: {value}\r\n");
    }

    let _ = write!(head, "{}: {}\r\n\r\n", Name::CONTENT_LENGTH, body.len());

    let mut buffer = BytesMut::with_capacity(head.len() + body.len());
    buffer.put(head.as_bytes());
    buffer.put(body.as_ref());
    buffer.freeze()
}

/// Parse a complete message from `buffer`.
///
/// Without a `Content-Length` header the rest of the buffer is taken as body, which is
/// only correct for datagram transports. Stream transports always frame messages by length
/// before handing them here.
pub fn parse_message(buffer: Bytes) -> Result<Message, ParseError> {
    let mut lines = HeadLines::new(&buffer);

    let mut message_line = None;
    let mut headers = Headers::new();

    for line in &mut lines {
        let line = line.map_err(|_| ParseError::MalformedMessage("incomplete message head"))?;
        let line = from_utf8(line).map_err(|_| ParseError::MalformedMessage("invalid utf-8"))?;

        if message_line.is_none() {
            let (_, line) = MessageLine::parse(&buffer)(line)
                .finish()
                .map_err(|_| ParseError::MalformedMessage("invalid start line"))?;

            message_line = Some(line);
        } else {
            match Line::parse(&buffer, line).finish() {
                Ok((_, line)) => headers.insert(line.name, line.value),
                Err(e) => {
                    log::debug!("ignoring malformed header line, {e}");
                }
            }
        }
    }

    let message_line = message_line.ok_or(ParseError::MalformedMessage("empty message"))?;
    let head_end = lines.head_end();

    let body = match headers.try_get_named::<ContentLength>() {
        Some(Ok(ContentLength(0))) => Bytes::new(),
        Some(Ok(ContentLength(len))) => {
            if buffer.len() < head_end + len {
                return Err(ParseError::MalformedMessage("incomplete body"));
            }

            buffer.slice(head_end..head_end + len)
        }
        Some(Err(e)) => return Err(e.into()),
        None => buffer.slice(head_end.min(buffer.len())..),
    };

    // reject messages which cannot be matched to any transaction or dialog
    BaseHeaders::extract_from(&headers)?;

    Ok(match message_line {
        MessageLine::Request(line) => Message::Request(Request {
            line,
            headers,
            body,
        }),
        MessageLine::Response(line) => Message::Response(Response {
            line,
            headers,
            body,
        }),
    })
}

#[cfg(test)]
mod test {
    use super::*;

    const INVITE: &[u8] = b"INVITE sip:bob@biloxi.example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP pc33.atlanta.example.com;branch=z9hG4bK776asdhds\r\n\
Max-Forwards: 70\r\n\
To: Bob <sip:bob@biloxi.example.com>\r\n\
From: Alice <sip:alice@atlanta.example.com>;tag=1928301774\r\n\
Call-ID: a84b4c76e66710@pc33.atlanta.example.com\r\n\
CSeq: 314159 INVITE\r\n\
Content-Type: application/sdp\r\n\
Content-Length: 4\r\n\
\r\n\
v=0\n";

    #[test]
    fn parse_request() {
        let Message::Request(request) = parse_message(Bytes::from_static(INVITE)).unwrap() else {
            panic!("expected request");
        };

        assert_eq!(request.line.method, Method::INVITE);
        assert_eq!(request.body, Bytes::from_static(b"v=0\n"));

        let cseq: CSeq = request.headers.get_named().unwrap();
        assert_eq!(cseq, CSeq::new(314159, Method::INVITE));
    }

    #[test]
    fn parse_response_without_content_length() {
        let msg = b"SIP/2.0 180 Ringing\r\n\
Via: SIP/2.0/UDP 10.0.0.1;branch=z9hG4bKabc\r\n\
From: <sip:a@example.com>;tag=1\r\n\
To: <sip:b@example.com>;tag=2\r\n\
Call-ID: xyz\r\n\
CSeq: 1 INVITE\r\n\r\n";

        let Message::Response(response) = parse_message(Bytes::from_static(msg)).unwrap() else {
            panic!("expected response");
        };

        assert_eq!(response.code(), StatusCode::RINGING);
        assert!(response.body.is_empty());
    }

    #[test]
    fn reject_garbage() {
        assert!(parse_message(Bytes::from_static(b"hello world\r\n\r\n")).is_err());
        assert!(parse_message(Bytes::from_static(b"INVITE sip:bob@example.com SIP/2.0\r\n")).is_err());
    }

    #[test]
    fn reject_missing_call_id() {
        let msg = b"OPTIONS sip:bob@example.com SIP/2.0\r\n\
Via: SIP/2.0/UDP 10.0.0.1;branch=z9hG4bKabc\r\n\
From: <sip:a@example.com>;tag=1\r\n\
To: <sip:b@example.com>\r\n\
CSeq: 1 OPTIONS\r\n\r\n";

        assert!(matches!(
            parse_message(Bytes::from_static(msg)),
            Err(ParseError::Header(_))
        ));
    }

    #[test]
    fn print_sets_content_length() {
        let mut request = Request::new(Method::MESSAGE, "sip:bob@example.com".parse().unwrap());
        request.headers.insert(Name::CONTENT_LENGTH, "999");
        request.headers.insert(Name::CALL_ID, "abc");
        request.body = Bytes::from_static(b"hi");

        let printed = request.print();

        assert_eq!(
            printed,
            Bytes::from_static(
                b"MESSAGE sip:bob@example.com SIP/2.0\r\nCall-ID: abc\r\nContent-Length: 2\r\n\r\nhi"
            )
        );
    }

    #[test]
    fn response_copies_dialog_headers() {
        let Message::Request(request) = parse_message(Bytes::from_static(INVITE)).unwrap() else {
            panic!("expected request");
        };

        let response = request.create_response(StatusCode::BUSY_HERE, None);

        assert_eq!(response.headers.len(), 5);
        assert!(!response.headers.contains(&Name::MAX_FORWARDS));
        assert!(response.print().starts_with(b"SIP/2.0 486 Busy Here\r\n"));
    }
}

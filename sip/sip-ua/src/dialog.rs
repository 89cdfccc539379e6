//! SIP dialogs (RFC 3261 section 12)

use crate::util::{random_sequence_number, random_string};
use bytesstr::BytesStr;
use sip_core::{BaseHeaders, Request, Response};
use sip_types::header::typed::{CSeq, CallID, Contact, FromTo, RecordRoute, Route, Routing};
use sip_types::uri::{NameAddr, SipUri};
use sip_types::{Method, Name, StatusCode};
use std::net::SocketAddr;

/// Methods the user agent accepts, sent in `Allow` headers
pub const ALLOWED_METHODS: &str = "INVITE, ACK, CANCEL, BYE, OPTIONS, INFO, NOTIFY";

#[derive(Debug, Clone)]
pub struct Dialog {
    /// Local CSeq number, increments with every request constructed using this dialog
    pub local_cseq: u32,

    /// Highest CSeq number seen in requests from the peer
    pub peer_cseq: Option<u32>,

    /// Local identity, the tag is always set
    pub from: FromTo,

    /// Peer identity, without tag until the peer answered
    pub to: FromTo,

    pub call_id: CallID,

    pub local_contact: Contact,

    /// Request URI of requests inside the dialog, the peer's Contact
    pub peer_target: SipUri,

    /// Route set, inserted as `Route` headers into every request
    pub route_set: Vec<Routing>,

    /// Address every message of the dialog is sent to
    pub target: SocketAddr,

    /// Identifiers are frozen once the dialog is confirmed
    confirmed: bool,
}

impl Dialog {
    /// Create the dialog of an outgoing INVITE
    pub fn new_client(
        local: NameAddr,
        peer: SipUri,
        local_contact: Contact,
        target: SocketAddr,
    ) -> Self {
        Self {
            local_cseq: random_sequence_number(),
            peer_cseq: None,
            from: FromTo::new(local, Some(random_string())),
            to: FromTo::new(NameAddr::uri(peer.clone()), None),
            call_id: CallID::new(random_string()),
            local_contact,
            peer_target: peer,
            route_set: vec![],
            target,
            confirmed: false,
        }
    }

    /// Create the dialog for an incoming INVITE received from `source`
    pub fn new_server(
        request: &Request,
        base: &BaseHeaders,
        local_contact: Contact,
        source: SocketAddr,
    ) -> Self {
        let peer_target = request
            .headers
            .get_named::<Contact>()
            .map(|contact| contact.uri.uri)
            .unwrap_or_else(|_| base.from.uri.uri.clone());

        let route_set = request
            .headers
            .get_all_named::<RecordRoute>()
            .unwrap_or_default()
            .into_iter()
            .map(|record_route| record_route.0)
            .collect();

        // From and To are swapped, they are taken from an incoming request
        Self {
            local_cseq: random_sequence_number(),
            peer_cseq: Some(base.cseq.cseq),
            from: FromTo::new(base.to.uri.clone(), Some(random_string())),
            to: base.from.clone(),
            call_id: base.call_id.clone(),
            local_contact,
            peer_target,
            route_set,
            target: source,
            confirmed: true,
        }
    }

    pub fn local_tag(&self) -> Option<&BytesStr> {
        self.from.tag.as_ref()
    }

    pub fn peer_tag(&self) -> Option<&BytesStr> {
        self.to.tag.as_ref()
    }

    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// Does the request or response with `base` belong to this dialog
    pub fn matches(&self, base: &BaseHeaders, incoming_request: bool) -> bool {
        if base.call_id != self.call_id {
            return false;
        }

        let (local, peer) = if incoming_request {
            (&base.to, &base.from)
        } else {
            (&base.from, &base.to)
        };

        local.tag.as_ref() == self.local_tag()
            && (self.peer_tag().is_none() || peer.tag.as_ref() == self.peer_tag())
    }

    /// Take the peer's tag, target and route set from a response to the initial INVITE.
    ///
    /// Does nothing once the dialog is confirmed.
    pub fn update_from_response(&mut self, response: &Response) {
        if self.confirmed {
            return;
        }

        if let Ok(to) = response.headers.get::<FromTo>(Name::TO) {
            if to.tag.is_some() {
                self.to.tag = to.tag;
            }
        }

        if let Ok(contact) = response.headers.get_named::<Contact>() {
            self.peer_target = contact.uri.uri;
        }

        // Record-Route is reversed on the client side
        self.route_set = response
            .headers
            .get_all_named::<RecordRoute>()
            .unwrap_or_default()
            .into_iter()
            .rev()
            .map(|record_route| record_route.0)
            .collect();
    }

    pub fn confirm(&mut self) {
        self.confirmed = true;
    }

    /// Check the CSeq of a request from the peer, out of order requests must be rejected
    pub fn receive_cseq(&mut self, cseq: u32) -> bool {
        match self.peer_cseq {
            Some(peer_cseq) if cseq < peer_cseq => false,
            _ => {
                self.peer_cseq = Some(cseq);
                true
            }
        }
    }

    pub fn create_request(&mut self, method: Method) -> Request {
        let cseq = CSeq::new(self.local_cseq, method.clone());
        self.local_cseq += 1;

        self.build_request(method, cseq)
    }

    /// ACK to a 2xx response, which shares the CSeq number of its INVITE
    pub fn create_ack(&self, invite_cseq: u32) -> Request {
        self.build_request(Method::ACK, CSeq::new(invite_cseq, Method::ACK))
    }

    fn build_request(&self, method: Method, cseq: CSeq) -> Request {
        let needs_contact = method == Method::INVITE || method == Method::REFER;

        let mut request = Request::new(method, self.peer_target.clone());

        for route in &self.route_set {
            request.headers.insert_named(&Route(route.clone()));
        }

        request.headers.insert(Name::MAX_FORWARDS, "70");
        request.headers.insert_type(Name::FROM, &self.from);
        request.headers.insert_type(Name::TO, &self.to);
        request.headers.insert_named(&self.call_id);
        request.headers.insert_named(&cseq);

        if needs_contact {
            request.headers.insert_named(&self.local_contact);
        }

        request
    }

    pub fn create_response(
        &self,
        request: &Request,
        code: StatusCode,
        reason: Option<&str>,
    ) -> Response {
        let mut response = request.create_response(code, reason);

        // 100 Trying never carries a tag
        if code != StatusCode::TRYING {
            response.headers.remove(&Name::TO);
            response.headers.insert_type(Name::TO, &self.from);
        }

        if *request.method() == Method::INVITE {
            if let 101..=399 | 485 = code.into_u16() {
                response.headers.insert_named(&self.local_contact);
            }

            if let 180..=189 | 200..=299 | 405 = code.into_u16() {
                response.headers.insert(Name::ALLOW, ALLOWED_METHODS);
            }
        }

        response
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use bytes::Bytes;
    use sip_core::{Message, parse_message};

    const INVITE: &[u8] = b"INVITE sip:alice@192.0.2.10 SIP/2.0\r\n\
Via: SIP/2.0/UDP 192.0.2.1;branch=z9hG4bKnashds8\r\n\
Max-Forwards: 70\r\n\
Record-Route: <sip:p1.example.com;lr>\r\n\
Record-Route: <sip:p2.example.com;lr>\r\n\
From: Bob <sip:bob@example.com>;tag=9fxced76sl\r\n\
To: Alice <sip:alice@example.com>\r\n\
Call-ID: 3848276298220188511@example.com\r\n\
CSeq: 2 INVITE\r\n\
Contact: <sip:bob@192.0.2.1>\r\n\
Content-Length: 0\r\n\r\n";

    fn incoming() -> (Request, BaseHeaders) {
        let Message::Request(request) = parse_message(Bytes::from_static(INVITE)).unwrap() else {
            panic!("expected request");
        };

        let base = BaseHeaders::extract_from(&request.headers).unwrap();

        (request, base)
    }

    fn contact() -> Contact {
        Contact::new(NameAddr::uri("sip:alice@192.0.2.10".parse().unwrap()))
    }

    fn target() -> SocketAddr {
        "192.0.2.1:5060".parse().unwrap()
    }

    #[test]
    fn server_dialog_swaps_identities() {
        let (request, base) = incoming();
        let mut dialog = Dialog::new_server(&request, &base, contact(), target());

        assert_eq!(dialog.peer_tag().unwrap(), "9fxced76sl");
        assert!(dialog.local_tag().is_some());
        assert_eq!(dialog.peer_target.to_string(), "sip:bob@192.0.2.1");
        assert_eq!(dialog.route_set.len(), 2);

        let bye = dialog.create_request(Method::BYE);
        let routes: Vec<Route> = bye.headers.get_all_named().unwrap();

        // server side keeps the Record-Route order
        assert_eq!(routes[0].0.uri.uri.to_string(), "sip:p1.example.com;lr");
        assert_eq!(bye.line.uri.to_string(), "sip:bob@192.0.2.1");

        let to: FromTo = bye.headers.get(Name::TO).unwrap();
        assert_eq!(to.tag.unwrap(), "9fxced76sl");
    }

    #[test]
    fn response_carries_local_tag_and_contact() {
        let (request, base) = incoming();
        let dialog = Dialog::new_server(&request, &base, contact(), target());

        let ringing = dialog.create_response(&request, StatusCode::RINGING, None);
        let to: FromTo = ringing.headers.get(Name::TO).unwrap();

        assert_eq!(to.tag.as_ref(), dialog.local_tag());
        assert!(ringing.headers.contains(&Name::CONTACT));
        assert!(ringing.headers.contains(&Name::ALLOW));

        let trying = dialog.create_response(&request, StatusCode::TRYING, None);
        let to: FromTo = trying.headers.get(Name::TO).unwrap();
        assert!(to.tag.is_none());
    }

    #[test]
    fn incoming_request_matching() {
        let (request, base) = incoming();
        let dialog = Dialog::new_server(&request, &base, contact(), target());

        let mut in_dialog = base.clone();
        in_dialog.to.tag = dialog.local_tag().cloned();
        assert!(dialog.matches(&in_dialog, true));

        in_dialog.to.tag = Some("other".into());
        assert!(!dialog.matches(&in_dialog, true));
    }

    #[test]
    fn cseq_ordering() {
        let (request, base) = incoming();
        let mut dialog = Dialog::new_server(&request, &base, contact(), target());

        assert!(dialog.receive_cseq(3));
        assert!(!dialog.receive_cseq(1));
        assert!(dialog.receive_cseq(3));
    }

    #[test]
    fn client_dialog_freezes_after_confirm() {
        let mut dialog = Dialog::new_client(
            NameAddr::uri("sip:alice@example.com".parse().unwrap()),
            "sip:bob@example.com".parse().unwrap(),
            contact(),
            target(),
        );

        let invite = dialog.create_request(Method::INVITE);
        let mut ok = invite.create_response(StatusCode::OK, None);
        ok.headers.remove(&Name::TO);
        ok.headers.insert(Name::TO, "<sip:bob@example.com>;tag=b1");
        ok.headers.insert(Name::CONTACT, "<sip:bob@192.0.2.20>");
        ok.headers.insert(Name::RECORD_ROUTE, "<sip:p2.example.com;lr>, <sip:p1.example.com;lr>");

        dialog.update_from_response(&ok);
        dialog.confirm();

        assert_eq!(dialog.peer_tag().unwrap(), "b1");
        assert_eq!(dialog.peer_target.to_string(), "sip:bob@192.0.2.20");
        assert_eq!(dialog.route_set[0].uri.uri.to_string(), "sip:p1.example.com;lr");

        let mut other = ok.clone();
        other.headers.remove(&Name::TO);
        other.headers.insert(Name::TO, "<sip:bob@example.com>;tag=b2");
        dialog.update_from_response(&other);

        assert_eq!(dialog.peer_tag().unwrap(), "b1");

        let ack = dialog.create_ack(7);
        let cseq: CSeq = ack.headers.get_named().unwrap();
        assert_eq!(cseq, CSeq::new(7, Method::ACK));
    }
}

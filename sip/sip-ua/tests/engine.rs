use bytes::Bytes;
use sip_core::transport::TransportKind;
use sip_core::{Message, Request, Response, parse_message};
use sip_types::header::typed::{CSeq, CallID, ContentType, Expires, FromTo};
use sip_types::{Method, Name, StatusCode};
use dialtone_sip_ua::{
    Account, AgentError, CallId, CallIds, CallState, CloseReason, Command, Event, Failure,
    NullMedia, RegistrationState, UserAgent, UserAgentConfig,
};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

const SDP: &str = "v=0\r\n\
o=- 7 7 IN IP4 192.0.2.30\r\n\
s=-\r\n\
c=IN IP4 192.0.2.30\r\n\
t=0 0\r\n\
m=audio 6000 RTP/AVP 0\r\n\
a=sendrecv\r\n";

fn local() -> SocketAddr {
    "192.0.2.10:5060".parse().unwrap()
}

fn registrar() -> SocketAddr {
    "192.0.2.1:5060".parse().unwrap()
}

fn peer() -> SocketAddr {
    "192.0.2.30:5060".parse().unwrap()
}

struct Harness {
    agent: UserAgent<NullMedia>,
    ids: CallIds,
    now: Instant,
    responses: Vec<Response>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(UserAgentConfig::new(
            Account::new("alice", "example.com").with_password("secret"),
        ))
    }

    fn with_config(config: UserAgentConfig) -> Self {
        let ids = CallIds::default();
        let media = NullMedia::new(Ipv4Addr::new(192, 0, 2, 10).into(), 4000);

        let agent = UserAgent::new(
            config,
            media,
            TransportKind::Udp,
            local(),
            registrar(),
            ids.clone(),
        )
        .unwrap();

        Self {
            agent,
            ids,
            now: Instant::now(),
            responses: vec![],
        }
    }

    fn command(&mut self, command: Command) -> Result<(), AgentError> {
        self.agent.handle_command(self.now, command)
    }

    /// Drain all transmits, requests are returned and responses collected
    fn requests(&mut self) -> Vec<Request> {
        let mut requests = vec![];

        while let Some(transmit) = self.agent.poll_transmit() {
            match parse_message(transmit.bytes).unwrap() {
                Message::Request(request) => requests.push(request),
                Message::Response(response) => self.responses.push(response),
            }
        }

        requests
    }

    fn take_responses(&mut self) -> Vec<Response> {
        self.requests();
        std::mem::take(&mut self.responses)
    }

    fn single_request(&mut self, method: Method) -> Request {
        let mut requests: Vec<Request> = self
            .requests()
            .into_iter()
            .filter(|request| request.line.method == method)
            .collect();

        assert_eq!(requests.len(), 1, "expected exactly one {method}");
        requests.remove(0)
    }

    fn events(&mut self) -> Vec<Event> {
        std::iter::from_fn(|| self.agent.poll_event()).collect()
    }

    fn receive(&mut self, response: Response) {
        self.agent
            .handle_message(self.now, Message::Response(response), registrar());
    }

    fn receive_raw(&mut self, message: String) {
        self.agent
            .handle_datagram(self.now, Bytes::from(message), peer());
    }

    /// Move the clock forward, firing every timer on the way
    fn advance(&mut self, by: Duration) {
        let until = self.now + by;

        while let Some(deadline) = self.agent.next_deadline() {
            if deadline > until {
                break;
            }

            self.now = self.now.max(deadline);
            self.agent.handle_timeout(self.now);
        }

        self.now = until;
        self.agent.handle_timeout(until);
    }

    /// Place a call to bob and let it be answered
    fn established(&mut self) -> CallId {
        self.established_with_invite().0
    }

    fn established_with_invite(&mut self) -> (CallId, Request) {
        let call = self.ids.next();

        self.command(Command::MakeCall {
            call,
            target: "sip:bob@example.com".into(),
        })
        .unwrap();

        let invite = self.single_request(Method::INVITE);
        self.receive(answer(&invite));
        self.single_request(Method::ACK);
        self.events();

        (call, invite)
    }

    fn call_state(&mut self, call: CallId) -> Option<CallState> {
        self.agent.snapshot().call(call).map(|call| call.state)
    }

    /// Register with the registrar granting `expires` seconds
    fn registered(&mut self, expires: u32) {
        self.command(Command::Register).unwrap();

        let register = self.single_request(Method::REGISTER);
        let mut ok = response(&register, StatusCode::OK, Some("registrar"));
        ok.headers.insert_named(&Expires(expires));
        self.receive(ok);

        self.events();
    }
}

fn response(request: &Request, code: StatusCode, tag: Option<&str>) -> Response {
    let mut response = request.create_response(code, None);

    if let Some(tag) = tag {
        let mut to: FromTo = request.headers.get(Name::TO).unwrap();
        to.tag = Some(tag.into());

        response.headers.remove(&Name::TO);
        response.headers.insert_type(Name::TO, &to);
    }

    response
}

fn answer(invite: &Request) -> Response {
    let mut ok = response(invite, StatusCode::OK, Some("bob"));
    ok.headers.insert(Name::CONTACT, "<sip:bob@192.0.2.30>");
    ok.headers.insert_named(&ContentType::new("application/sdp"));
    ok.body = Bytes::from_static(SDP.as_bytes());
    ok
}

fn challenge(request: &Request) -> Response {
    let mut response = response(request, StatusCode::UNAUTHORIZED, Some("registrar"));
    response.headers.insert(
        Name::WWW_AUTHENTICATE,
        "Digest realm=\"example.com\", nonce=\"dcd98b7102dd2f0e\", qop=\"auth\", algorithm=MD5",
    );
    response
}

fn incoming_invite(branch: &str) -> String {
    format!(
        "INVITE sip:alice@192.0.2.10 SIP/2.0\r\n\
Via: SIP/2.0/UDP 192.0.2.30:5060;branch={branch}\r\n\
Max-Forwards: 70\r\n\
From: \"Bob\" <sip:bob@example.com>;tag=bob1\r\n\
To: <sip:alice@example.com>\r\n\
Call-ID: incoming-1@192.0.2.30\r\n\
CSeq: 1 INVITE\r\n\
Contact: <sip:bob@192.0.2.30>\r\n\
Content-Type: application/sdp\r\n\
Content-Length: {}\r\n\r\n{SDP}",
        SDP.len()
    )
}

fn incoming_call(h: &mut Harness) -> CallId {
    h.receive_raw(incoming_invite("z9hG4bKinvite1"));

    match h.events().as_slice() {
        [
            Event::CallIncoming {
                call,
                remote,
                display_name,
            },
            Event::CallRinging { call: ringing },
        ] => {
            assert_eq!(remote, "sip:bob@example.com");
            assert_eq!(display_name.as_deref(), Some("Bob"));
            assert_eq!(call, ringing);
            *call
        }
        events => panic!("unexpected events {events:?}"),
    }
}

#[test]
fn outgoing_call_events_in_order() {
    let mut h = Harness::new();
    let call = h.ids.next();

    h.command(Command::MakeCall {
        call,
        target: "sip:bob@example.com".into(),
    })
    .unwrap();

    let invite = h.single_request(Method::INVITE);
    assert_eq!(invite.line.uri.to_string(), "sip:bob@example.com");
    assert!(invite.body.starts_with(b"v=0"));

    h.receive(response(&invite, StatusCode::RINGING, Some("bob")));
    assert_eq!(
        h.agent.snapshot().call(call).unwrap().state,
        CallState::Ringing
    );

    h.receive(answer(&invite));

    let ack = h.single_request(Method::ACK);
    assert_eq!(ack.line.uri.to_string(), "sip:bob@192.0.2.30");

    let invite_cseq: CSeq = invite.headers.get_named().unwrap();
    let ack_cseq: CSeq = ack.headers.get_named().unwrap();
    assert_eq!(ack_cseq.cseq, invite_cseq.cseq);

    assert_eq!(
        h.events(),
        vec![
            Event::CallOutgoing {
                call,
                remote: "sip:bob@example.com".into()
            },
            Event::CallRinging { call },
            Event::CallEstablished { call },
        ]
    );

    assert_eq!(
        h.agent.snapshot().call(call).unwrap().state,
        CallState::Established
    );
}

#[test]
fn retransmitted_ok_is_acknowledged_again() {
    let mut h = Harness::new();
    let call = h.ids.next();

    h.command(Command::MakeCall {
        call,
        target: "sip:bob@example.com".into(),
    })
    .unwrap();

    let invite = h.single_request(Method::INVITE);
    h.receive(answer(&invite));
    h.single_request(Method::ACK);

    h.receive(answer(&invite));
    h.single_request(Method::ACK);

    let established = h
        .events()
        .into_iter()
        .filter(|event| matches!(event, Event::CallEstablished { .. }))
        .count();
    assert_eq!(established, 1);
}

#[test]
fn hangup_while_calling_sends_cancel() {
    let mut h = Harness::new();
    let call = h.ids.next();

    h.command(Command::MakeCall {
        call,
        target: "sip:bob@example.com".into(),
    })
    .unwrap();

    let invite = h.single_request(Method::INVITE);
    h.events();

    h.command(Command::Hangup {
        call,
        code: None,
        reason: None,
    })
    .unwrap();

    let cancel = h.single_request(Method::CANCEL);
    assert_eq!(cancel.line.uri, invite.line.uri);
    assert!(h.events().is_empty());

    // a second hangup does not race the cancellation
    assert_eq!(
        h.command(Command::Hangup {
            call,
            code: None,
            reason: None
        }),
        Err(AgentError::InvalidState("hangup"))
    );

    h.receive(response(&cancel, StatusCode::OK, None));

    assert_eq!(
        h.events(),
        vec![Event::CallClosed {
            call,
            reason: CloseReason::Cancelled
        }]
    );

    h.receive(response(&invite, StatusCode::REQUEST_TERMINATED, Some("bob")));
    h.single_request(Method::ACK);

    h.advance(Duration::from_secs(60));

    let stray: Vec<Method> = h
        .requests()
        .into_iter()
        .map(|request| request.line.method)
        .collect();
    assert!(stray.is_empty(), "stray retransmissions {stray:?}");
    assert!(h.events().is_empty());

    assert!(h.agent.snapshot().call(call).is_none());
    assert!(h.agent.is_idle());
}

#[test]
fn ok_racing_cancel_is_acknowledged_and_ended() {
    let mut h = Harness::new();
    let call = h.ids.next();

    h.command(Command::MakeCall {
        call,
        target: "sip:bob@example.com".into(),
    })
    .unwrap();

    let invite = h.single_request(Method::INVITE);
    h.receive(response(&invite, StatusCode::RINGING, Some("bob")));

    h.command(Command::Hangup {
        call,
        code: None,
        reason: None,
    })
    .unwrap();
    h.single_request(Method::CANCEL);

    h.receive(answer(&invite));

    let methods: Vec<Method> = h
        .requests()
        .into_iter()
        .map(|request| request.line.method)
        .collect();
    assert_eq!(methods, vec![Method::ACK, Method::BYE]);

    let closed: Vec<Event> = h
        .events()
        .into_iter()
        .filter(|event| matches!(event, Event::CallClosed { .. }))
        .collect();
    assert_eq!(
        closed,
        vec![Event::CallClosed {
            call,
            reason: CloseReason::Cancelled
        }]
    );
}

#[test]
fn hold_before_established_is_refused() {
    let mut h = Harness::new();
    let call = h.ids.next();

    h.command(Command::MakeCall {
        call,
        target: "sip:bob@example.com".into(),
    })
    .unwrap();
    h.requests();
    h.events();

    assert_eq!(
        h.command(Command::Hold(call)),
        Err(AgentError::InvalidState("hold"))
    );

    assert!(h.agent.poll_transmit().is_none());
    assert!(h.events().is_empty());
    assert_eq!(
        h.agent.snapshot().call(call).unwrap().state,
        CallState::Calling
    );
}

#[test]
fn invite_timeout_closes_the_call_once() {
    let mut h = Harness::new();
    let call = h.ids.next();

    h.command(Command::MakeCall {
        call,
        target: "sip:bob@example.com".into(),
    })
    .unwrap();
    h.events();

    h.advance(Duration::from_secs(40));

    let retransmissions = h
        .requests()
        .into_iter()
        .filter(|request| request.line.method == Method::INVITE)
        .count();
    assert!(retransmissions > 1);

    h.advance(Duration::from_secs(300));
    assert!(h.requests().is_empty());

    let closed: Vec<Event> = h.events();
    assert_eq!(
        closed,
        vec![Event::CallClosed {
            call,
            reason: CloseReason::NoAnswer
        }]
    );

    assert!(h.agent.snapshot().calls.is_empty());
}

#[test]
fn unknown_call_is_reported() {
    let mut h = Harness::new();
    let call = h.ids.next();

    assert_eq!(
        h.command(Command::Answer(call)),
        Err(AgentError::UnknownCall(call))
    );
}

#[test]
fn call_limit() {
    let mut config = UserAgentConfig::new(Account::new("alice", "example.com"));
    config.max_calls = 1;

    let mut h = Harness::with_config(config);

    h.command(Command::MakeCall {
        call: h.ids.next(),
        target: "bob@example.com".into(),
    })
    .unwrap();

    assert_eq!(
        h.command(Command::MakeCall {
            call: h.ids.next(),
            target: "carol@example.com".into(),
        }),
        Err(AgentError::TooManyCalls)
    );

    // incoming calls are refused as well
    h.requests();
    h.receive_raw(incoming_invite("z9hG4bKinvite2"));

    let responses = h.take_responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].code(), StatusCode::BUSY_HERE);
}

#[test]
fn invalid_target() {
    let mut h = Harness::new();

    assert!(matches!(
        h.command(Command::MakeCall {
            call: h.ids.next(),
            target: "".into(),
        }),
        Err(AgentError::InvalidUri(..))
    ));
    assert!(h.agent.poll_transmit().is_none());
}

#[test]
fn unregister_without_binding_is_a_noop() {
    let mut h = Harness::new();

    h.command(Command::Unregister).unwrap();
    h.command(Command::Unregister).unwrap();

    assert!(h.agent.poll_transmit().is_none());
    assert!(h.events().is_empty());
    assert_eq!(h.agent.registration_state(), RegistrationState::Unregistered);
}

#[test]
fn single_authentication_retry() {
    let mut h = Harness::new();

    h.command(Command::Register).unwrap();
    assert_eq!(h.events(), vec![Event::WillRegister]);

    let register = h.single_request(Method::REGISTER);
    assert!(!register.headers.contains(&Name::AUTHORIZATION));

    h.receive(challenge(&register));

    let retry = h.single_request(Method::REGISTER);
    assert!(retry.headers.contains(&Name::AUTHORIZATION));

    let first: CSeq = register.headers.get_named().unwrap();
    let second: CSeq = retry.headers.get_named().unwrap();
    assert!(second.cseq > first.cseq);

    h.receive(challenge(&retry));

    assert!(h.requests().is_empty());
    assert_eq!(
        h.events(),
        vec![Event::FailedRegister {
            failure: Failure::AuthenticationFailed
        }]
    );
    assert_eq!(h.agent.registration_state(), RegistrationState::Failed);
}

#[test]
fn refresh_happens_before_expiry() {
    let account = Account::new("alice", "example.com")
        .with_registration_interval(Duration::from_secs(300));
    let mut h = Harness::with_config(UserAgentConfig::new(account));

    h.command(Command::Register).unwrap();

    let register = h.single_request(Method::REGISTER);
    assert_eq!(
        register.headers.get_named::<Expires>().unwrap(),
        Expires(300)
    );

    let mut ok = response(&register, StatusCode::OK, Some("registrar"));
    ok.headers.insert_named(&Expires(120));
    h.receive(ok);

    assert_eq!(
        h.events(),
        vec![
            Event::WillRegister,
            Event::DidRegister {
                expires: Duration::from_secs(120)
            }
        ]
    );
    assert_eq!(h.agent.registration_state(), RegistrationState::Registered);

    h.advance(Duration::from_secs(100));
    assert!(h.requests().is_empty());

    // 0.9 of the granted 120s
    h.advance(Duration::from_secs(8));

    let refresh = h.single_request(Method::REGISTER);
    assert_eq!(
        refresh.headers.get_named::<Expires>().unwrap(),
        Expires(300)
    );
    assert_eq!(h.events(), vec![Event::WillRegister]);
    assert_eq!(h.agent.registration_state(), RegistrationState::Refreshing);
    assert!(h.agent.registration_state().is_registered());
}

#[test]
fn interval_too_brief_is_retried_once() {
    let mut h = Harness::new();

    h.command(Command::Register).unwrap();
    let register = h.single_request(Method::REGISTER);

    let mut too_brief = response(&register, StatusCode::INTERVAL_TOO_BRIEF, Some("registrar"));
    too_brief.headers.insert(Name::MIN_EXPIRES, "1800");
    h.receive(too_brief);

    let retry = h.single_request(Method::REGISTER);
    assert_eq!(retry.headers.get_named::<Expires>().unwrap(), Expires(1800));
}

#[test]
fn incoming_call_answered() {
    let mut h = Harness::new();
    let call = incoming_call(&mut h);

    let ringing = h.take_responses();
    assert_eq!(ringing.len(), 1);
    assert_eq!(ringing[0].code(), StatusCode::RINGING);

    h.command(Command::Answer(call)).unwrap();

    let ok = h.take_responses().remove(0);
    assert_eq!(ok.code(), StatusCode::OK);
    assert!(ok.body.starts_with(b"v=0"));

    let to: FromTo = ok.headers.get(Name::TO).unwrap();
    assert!(to.tag.is_some());

    h.receive_raw(format!(
        "ACK sip:alice@192.0.2.10 SIP/2.0\r\n\
Via: SIP/2.0/UDP 192.0.2.30:5060;branch=z9hG4bKack1\r\n\
From: \"Bob\" <sip:bob@example.com>;tag=bob1\r\n\
To: {to}\r\n\
Call-ID: incoming-1@192.0.2.30\r\n\
CSeq: 1 ACK\r\n\
Content-Length: 0\r\n\r\n"
    ));

    assert_eq!(h.events(), vec![Event::CallEstablished { call }]);

    // remote hangup
    h.receive_raw(format!(
        "BYE sip:alice@192.0.2.10 SIP/2.0\r\n\
Via: SIP/2.0/UDP 192.0.2.30:5060;branch=z9hG4bKbye1\r\n\
From: \"Bob\" <sip:bob@example.com>;tag=bob1\r\n\
To: {to}\r\n\
Call-ID: incoming-1@192.0.2.30\r\n\
CSeq: 2 BYE\r\n\
Content-Length: 0\r\n\r\n"
    ));

    let ok = h.take_responses().remove(0);
    assert_eq!(ok.code(), StatusCode::OK);
    assert_eq!(
        h.events(),
        vec![Event::CallClosed {
            call,
            reason: CloseReason::RemoteHangup
        }]
    );
}

#[test]
fn incoming_call_declined() {
    let mut h = Harness::new();
    let call = incoming_call(&mut h);
    h.take_responses();

    h.command(Command::Hangup {
        call,
        code: None,
        reason: None,
    })
    .unwrap();

    let busy = h.take_responses().remove(0);
    assert_eq!(busy.code(), StatusCode::BUSY_HERE);
    assert_eq!(
        h.events(),
        vec![Event::CallClosed {
            call,
            reason: CloseReason::Declined(StatusCode::BUSY_HERE)
        }]
    );
}

#[test]
fn incoming_call_cancelled_by_caller() {
    let mut h = Harness::new();
    let call = incoming_call(&mut h);
    h.take_responses();

    h.receive_raw(
        "CANCEL sip:alice@192.0.2.10 SIP/2.0\r\n\
Via: SIP/2.0/UDP 192.0.2.30:5060;branch=z9hG4bKinvite1\r\n\
Max-Forwards: 70\r\n\
From: \"Bob\" <sip:bob@example.com>;tag=bob1\r\n\
To: <sip:alice@example.com>\r\n\
Call-ID: incoming-1@192.0.2.30\r\n\
CSeq: 1 CANCEL\r\n\
Content-Length: 0\r\n\r\n"
            .into(),
    );

    let mut codes: Vec<u16> = h
        .take_responses()
        .iter()
        .map(|response| response.code().into_u16())
        .collect();
    codes.sort();
    assert_eq!(codes, vec![200, 487]);

    assert_eq!(
        h.events(),
        vec![Event::CallClosed {
            call,
            reason: CloseReason::RemoteCancelled
        }]
    );
}

#[test]
fn requests_outside_of_dialogs() {
    let mut h = Harness::new();

    h.receive_raw(
        "BYE sip:alice@192.0.2.10 SIP/2.0\r\n\
Via: SIP/2.0/UDP 192.0.2.30:5060;branch=z9hG4bKstray\r\n\
From: <sip:bob@example.com>;tag=x1\r\n\
To: <sip:alice@example.com>;tag=unknown\r\n\
Call-ID: nothing@192.0.2.30\r\n\
CSeq: 5 BYE\r\n\
Content-Length: 0\r\n\r\n"
            .into(),
    );

    let responses = h.take_responses();
    assert_eq!(
        responses[0].code(),
        StatusCode::CALL_OR_TRANSACTION_DOES_NOT_EXIST
    );

    h.receive_raw(
        "OPTIONS sip:alice@192.0.2.10 SIP/2.0\r\n\
Via: SIP/2.0/UDP 192.0.2.30:5060;branch=z9hG4bKoptions\r\n\
From: <sip:bob@example.com>;tag=x2\r\n\
To: <sip:alice@example.com>\r\n\
Call-ID: options@192.0.2.30\r\n\
CSeq: 1 OPTIONS\r\n\
Content-Length: 0\r\n\r\n"
            .into(),
    );

    let responses = h.take_responses();
    assert_eq!(responses[0].code(), StatusCode::OK);
    assert!(responses[0].headers.contains(&Name::ALLOW));

    // garbage is dropped without a trace
    h.receive_raw("NOT SIP AT ALL".into());
    assert!(h.take_responses().is_empty());
    assert!(h.events().is_empty());
}

#[test]
fn hold_and_resume() {
    let mut h = Harness::new();
    let call = h.established();

    assert_eq!(
        h.command(Command::Resume(call)),
        Err(AgentError::InvalidState("resume"))
    );

    h.command(Command::Hold(call)).unwrap();

    let reinvite = h.single_request(Method::INVITE);
    assert!(
        std::str::from_utf8(&reinvite.body)
            .unwrap()
            .contains("a=sendonly")
    );

    // only one session modification at a time
    assert_eq!(
        h.command(Command::Hold(call)),
        Err(AgentError::InvalidState("hold"))
    );

    h.receive(answer(&reinvite));
    h.single_request(Method::ACK);

    assert_eq!(
        h.events(),
        vec![Event::CallHeld { call, local: true }]
    );
    assert!(h.agent.snapshot().call(call).unwrap().held);
    assert!(h.agent.media().is_held(call));

    h.command(Command::Resume(call)).unwrap();
    let reinvite = h.single_request(Method::INVITE);
    h.receive(response(&reinvite, StatusCode::REQUEST_PENDING, Some("bob")));

    // failed resume leaves the call on hold
    assert!(matches!(
        h.events().as_slice(),
        [Event::CallUpdateFailed { .. }]
    ));
    assert!(h.agent.snapshot().call(call).unwrap().held);
}

#[test]
fn dtmf_with_info() {
    let mut h = Harness::new();
    let call = h.established();

    assert_eq!(
        h.command(Command::SendDtmf { call, digit: 'x' }),
        Err(AgentError::InvalidDtmf('X'))
    );

    h.command(Command::SendDtmf { call, digit: '5' }).unwrap();

    let info = h.single_request(Method::INFO);
    assert!(info.body.starts_with(b"Signal=5\r\n"));
    assert_eq!(
        h.events(),
        vec![Event::CallDtmfStart {
            call,
            digit: '5',
            remote: false
        }]
    );

    h.receive(response(&info, StatusCode::OK, Some("bob")));

    assert_eq!(
        h.events(),
        vec![Event::CallDtmfEnd {
            call,
            digit: '5',
            remote: false
        }]
    );
}

#[test]
fn muting_is_local() {
    let mut h = Harness::new();
    let call = h.established();

    h.command(Command::SetMuted { call, muted: true }).unwrap();

    assert!(h.agent.poll_transmit().is_none());
    assert!(h.agent.media().is_muted(call));
    assert!(h.agent.snapshot().call(call).unwrap().muted);
}

#[test]
fn shutdown_ends_everything() {
    let mut h = Harness::new();

    h.command(Command::Register).unwrap();
    let register = h.single_request(Method::REGISTER);
    h.receive(response(&register, StatusCode::OK, Some("registrar")));

    let call = h.established();

    h.command(Command::Shutdown).unwrap();

    let mut requests = h.requests();
    requests.sort_by_key(|request| request.line.method.to_string());

    let bye = requests.remove(0);
    assert_eq!(bye.line.method, Method::BYE);

    let unregister = requests.remove(0);
    assert_eq!(unregister.line.method, Method::REGISTER);
    assert_eq!(unregister.headers.get_named::<Expires>().unwrap(), Expires(0));

    h.receive(response(&bye, StatusCode::OK, Some("bob")));
    h.receive(response(&unregister, StatusCode::OK, Some("registrar")));

    let events = h.events();
    assert!(events.contains(&Event::CallClosed {
        call,
        reason: CloseReason::LocalHangup
    }));
    assert!(events.contains(&Event::DidUnregister));

    assert_eq!(
        h.command(Command::MakeCall {
            call: h.ids.next(),
            target: "sip:bob@example.com".into()
        }),
        Err(AgentError::InvalidState("make_call"))
    );

    h.advance(Duration::from_secs(60));
    assert!(h.agent.is_idle());
}

#[test]
fn failed_refresh_is_not_retried() {
    let account = Account::new("alice", "example.com")
        .with_registration_interval(Duration::from_secs(300));
    let mut h = Harness::with_config(UserAgentConfig::new(account));

    h.registered(120);

    h.advance(Duration::from_secs(108));
    h.single_request(Method::REGISTER);
    assert_eq!(h.events(), vec![Event::WillRegister]);

    // the registrar stays silent until the transaction times out
    h.advance(Duration::from_secs(40));
    h.requests();

    assert_eq!(
        h.events(),
        vec![Event::FailedRegister {
            failure: Failure::TransactionTimeout
        }]
    );
    assert_eq!(h.agent.registration_state(), RegistrationState::Failed);

    h.advance(Duration::from_secs(600));
    assert!(h.requests().is_empty());
    assert!(h.events().is_empty());
    assert_eq!(h.agent.registration_state(), RegistrationState::Failed);
}

#[test]
fn unregister_after_failed_refresh_removes_the_binding() {
    let account = Account::new("alice", "example.com")
        .with_registration_interval(Duration::from_secs(300));
    let mut h = Harness::with_config(UserAgentConfig::new(account));

    h.registered(120);

    h.advance(Duration::from_secs(108));
    h.advance(Duration::from_secs(40));
    h.requests();
    h.events();
    assert_eq!(h.agent.registration_state(), RegistrationState::Failed);

    h.command(Command::Unregister).unwrap();

    let unregister = h.single_request(Method::REGISTER);
    assert_eq!(
        unregister.headers.get_named::<Expires>().unwrap(),
        Expires(0)
    );
    assert_eq!(h.events(), vec![Event::WillUnregister]);
    assert_eq!(
        h.agent.registration_state(),
        RegistrationState::Unregistering
    );

    h.receive(response(&unregister, StatusCode::OK, Some("registrar")));

    assert_eq!(h.events(), vec![Event::DidUnregister]);
    assert_eq!(h.agent.registration_state(), RegistrationState::Unregistered);
}

#[test]
fn unregister_after_rejected_registration() {
    let mut h = Harness::new();

    h.command(Command::Register).unwrap();
    let register = h.single_request(Method::REGISTER);
    h.receive(response(&register, StatusCode::FORBIDDEN, Some("registrar")));
    h.events();
    assert_eq!(h.agent.registration_state(), RegistrationState::Failed);

    // nothing was ever bound, no request is needed
    h.command(Command::Unregister).unwrap();

    assert!(h.requests().is_empty());
    assert_eq!(h.events(), vec![Event::WillUnregister, Event::DidUnregister]);
    assert_eq!(h.agent.registration_state(), RegistrationState::Unregistered);

    h.command(Command::Unregister).unwrap();
    assert!(h.requests().is_empty());
    assert!(h.events().is_empty());
}

#[test]
fn unanswered_incoming_call_gives_up() {
    let mut h = Harness::new();
    let call = incoming_call(&mut h);
    h.take_responses();

    assert!(h.agent.next_deadline().is_some());

    h.advance(Duration::from_secs(179));
    assert!(h.take_responses().is_empty());
    assert!(h.events().is_empty());
    assert_eq!(h.call_state(call), Some(CallState::Ringing));

    h.advance(Duration::from_secs(1));

    let responses = h.take_responses();
    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].code(), StatusCode::TEMPORARILY_UNAVAILABLE);

    assert_eq!(
        h.events(),
        vec![Event::CallClosed {
            call,
            reason: CloseReason::NoAnswer
        }]
    );

    // caller never acknowledges, the server transaction still ends
    h.advance(Duration::from_secs(60));
    h.take_responses();

    assert_eq!(h.call_state(call), None);
    assert!(h.agent.is_idle());
    assert!(h.agent.next_deadline().is_none());
}

#[test]
fn answered_incoming_call_does_not_give_up() {
    let mut config = UserAgentConfig::new(Account::new("alice", "example.com"));
    config.no_answer_timeout = Duration::from_secs(30);

    let mut h = Harness::with_config(config);
    let call = incoming_call(&mut h);
    h.take_responses();

    h.advance(Duration::from_secs(20));
    h.command(Command::Answer(call)).unwrap();

    let ok = h.take_responses().remove(0);
    assert_eq!(ok.code(), StatusCode::OK);

    h.advance(Duration::from_secs(60));

    let closed = h
        .events()
        .into_iter()
        .filter(|event| matches!(event, Event::CallClosed { reason: CloseReason::NoAnswer, .. }))
        .count();
    assert_eq!(closed, 0);
}

#[test]
fn dtmf_requires_an_established_call() {
    let mut h = Harness::new();
    let call = h.ids.next();

    h.command(Command::MakeCall {
        call,
        target: "sip:bob@example.com".into(),
    })
    .unwrap();
    h.requests();
    h.events();

    assert_eq!(
        h.command(Command::SendDtmf { call, digit: '5' }),
        Err(AgentError::InvalidState("send_dtmf"))
    );

    assert!(h.agent.poll_transmit().is_none());
    assert!(h.events().is_empty());
}

#[test]
fn rejected_transfer_keeps_the_call() {
    let mut h = Harness::new();
    let call = h.established();

    h.command(Command::Transfer {
        call,
        target: "sip:carol@example.com".into(),
    })
    .unwrap();

    let refer = h.single_request(Method::REFER);
    assert!(refer.headers.contains(&Name::REFER_TO));

    h.receive(response(&refer, StatusCode::FORBIDDEN, Some("bob")));

    assert!(matches!(
        h.events().as_slice(),
        [Event::CallTransferFailed {
            call: failed,
            failure: Failure::Rejected { code, .. },
        }] if *failed == call && *code == StatusCode::FORBIDDEN
    ));
    assert_eq!(h.call_state(call), Some(CallState::Established));

    // another attempt is allowed
    h.command(Command::Transfer {
        call,
        target: "sip:carol@example.com".into(),
    })
    .unwrap();
    h.single_request(Method::REFER);
}

#[test]
fn unanswered_transfer_keeps_the_call() {
    let mut h = Harness::new();
    let call = h.established();

    h.command(Command::Transfer {
        call,
        target: "sip:carol@example.com".into(),
    })
    .unwrap();
    h.single_request(Method::REFER);

    h.advance(Duration::from_secs(40));
    h.requests();

    assert_eq!(
        h.events(),
        vec![Event::CallTransferFailed {
            call,
            failure: Failure::TransactionTimeout
        }]
    );
    assert_eq!(h.call_state(call), Some(CallState::Established));
}

#[test]
fn transfer_failure_reported_by_notify() {
    let mut h = Harness::new();
    let (call, invite) = h.established_with_invite();

    h.command(Command::Transfer {
        call,
        target: "sip:carol@example.com".into(),
    })
    .unwrap();

    let refer = h.single_request(Method::REFER);
    h.receive(response(&refer, StatusCode::ACCEPTED, Some("bob")));
    assert_eq!(h.events(), vec![Event::CallTransferAccepted { call }]);

    let from: FromTo = invite.headers.get(Name::FROM).unwrap();
    let call_id: CallID = invite.headers.get_named().unwrap();
    let sipfrag = "SIP/2.0 486 Busy Here\r\n";

    h.receive_raw(format!(
        "NOTIFY sip:alice@192.0.2.10 SIP/2.0\r\n\
Via: SIP/2.0/UDP 192.0.2.30:5060;branch=z9hG4bKnotify1\r\n\
Max-Forwards: 70\r\n\
From: <sip:bob@example.com>;tag=bob\r\n\
To: {from}\r\n\
Call-ID: {}\r\n\
CSeq: 1 NOTIFY\r\n\
Event: refer\r\n\
Subscription-State: terminated;reason=noresource\r\n\
Content-Type: message/sipfrag\r\n\
Content-Length: {}\r\n\r\n{sipfrag}",
        call_id.0,
        sipfrag.len()
    ));

    let ok = h.take_responses().remove(0);
    assert_eq!(ok.code(), StatusCode::OK);

    assert!(matches!(
        h.events().as_slice(),
        [Event::CallTransferFailed {
            failure: Failure::Rejected { code, .. },
            ..
        }] if *code == StatusCode::BUSY_HERE
    ));
    assert_eq!(h.call_state(call), Some(CallState::Established));
}

#[test]
fn oversized_interval_is_clamped() {
    let account = Account::new("alice", "example.com")
        .with_registration_interval(Duration::from_secs(u64::from(u32::MAX) + 10));
    let mut h = Harness::with_config(UserAgentConfig::new(account));

    h.command(Command::Register).unwrap();

    let register = h.single_request(Method::REGISTER);
    assert_eq!(
        register.headers.get_named::<Expires>().unwrap(),
        Expires(u32::MAX)
    );
}

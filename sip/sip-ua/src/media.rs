use crate::event::CallId;
use crate::sdp::{self, MediaDirection};
use bytes::Bytes;
use std::collections::HashMap;
use std::net::IpAddr;

#[derive(Debug, thiserror::Error)]
#[error("unacceptable session description: {0}")]
pub struct MediaError(pub String);

/// The media subsystem of the user agent.
///
/// Negotiates session descriptions and applies mute and hold to the audio path. The engine
/// only signals intent: every method is called from the reactor and must return promptly.
pub trait MediaBackend: Send + 'static {
    /// SDP offer for a new session or for a re-INVITE of an existing one
    fn create_offer(&mut self, call: CallId, direction: MediaDirection) -> Bytes;

    /// Apply the peer's answer to the last offer
    fn receive_answer(&mut self, call: CallId, answer: &[u8]) -> Result<(), MediaError>;

    /// Answer the peer's offer. `direction` is what we want to do with the stream, the answer
    /// must be compatible with the offered direction.
    fn receive_offer(
        &mut self,
        call: CallId,
        offer: &[u8],
        direction: MediaDirection,
    ) -> Result<Bytes, MediaError>;

    fn set_muted(&mut self, call: CallId, muted: bool);

    fn set_hold(&mut self, call: CallId, held: bool);

    /// The call is gone, free everything associated with it
    fn release(&mut self, call: CallId);
}

impl<M: MediaBackend + ?Sized> MediaBackend for Box<M> {
    fn create_offer(&mut self, call: CallId, direction: MediaDirection) -> Bytes {
        (**self).create_offer(call, direction)
    }

    fn receive_answer(&mut self, call: CallId, answer: &[u8]) -> Result<(), MediaError> {
        (**self).receive_answer(call, answer)
    }

    fn receive_offer(
        &mut self,
        call: CallId,
        offer: &[u8],
        direction: MediaDirection,
    ) -> Result<Bytes, MediaError> {
        (**self).receive_offer(call, offer, direction)
    }

    fn set_muted(&mut self, call: CallId, muted: bool) {
        (**self).set_muted(call, muted)
    }

    fn set_hold(&mut self, call: CallId, held: bool) {
        (**self).set_hold(call, held)
    }

    fn release(&mut self, call: CallId) {
        (**self).release(call)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct NullSession {
    version: u64,
    muted: bool,
    held: bool,
}

/// Media backend without any media, describing a PCMU/PCMA audio stream with telephone-events
/// on a fixed address
#[derive(Debug)]
pub struct NullMedia {
    address: IpAddr,
    port: u16,
    sessions: HashMap<CallId, NullSession>,
}

impl NullMedia {
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self {
            address,
            port,
            sessions: HashMap::new(),
        }
    }

    pub fn is_muted(&self, call: CallId) -> bool {
        self.sessions.get(&call).is_some_and(|s| s.muted)
    }

    pub fn is_held(&self, call: CallId) -> bool {
        self.sessions.get(&call).is_some_and(|s| s.held)
    }

    /// Number of calls which have not been released
    pub fn sessions(&self) -> usize {
        self.sessions.len()
    }

    fn describe(&mut self, call: CallId, direction: MediaDirection) -> Bytes {
        let session = self.sessions.entry(call).or_default();
        session.version += 1;

        let family = if self.address.is_ipv4() { "IP4" } else { "IP6" };

        format!(
            "v=0\r\n\
o=- {id} {version} IN {family} {address}\r\n\
s=-\r\n\
c=IN {family} {address}\r\n\
t=0 0\r\n\
m=audio {port} RTP/AVP 0 8 101\r\n\
a=rtpmap:0 PCMU/8000\r\n\
a=rtpmap:8 PCMA/8000\r\n\
a=rtpmap:101 telephone-event/8000\r\n\
a=fmtp:101 0-16\r\n\
a={direction}\r\n",
            id = call.into_u64(),
            version = session.version,
            address = self.address,
            port = self.port,
        )
        .into()
    }
}

impl MediaBackend for NullMedia {
    fn create_offer(&mut self, call: CallId, direction: MediaDirection) -> Bytes {
        self.describe(call, direction)
    }

    fn receive_answer(&mut self, call: CallId, answer: &[u8]) -> Result<(), MediaError> {
        if !answer.starts_with(b"v=0") {
            return Err(MediaError(format!("{call}: answer is not SDP")));
        }

        Ok(())
    }

    fn receive_offer(
        &mut self,
        call: CallId,
        offer: &[u8],
        direction: MediaDirection,
    ) -> Result<Bytes, MediaError> {
        if !offer.starts_with(b"v=0") {
            return Err(MediaError(format!("{call}: offer is not SDP")));
        }

        let answer = sdp::direction(offer).answer(direction);

        Ok(self.describe(call, answer))
    }

    fn set_muted(&mut self, call: CallId, muted: bool) {
        self.sessions.entry(call).or_default().muted = muted;
    }

    fn set_hold(&mut self, call: CallId, held: bool) {
        self.sessions.entry(call).or_default().held = held;
    }

    fn release(&mut self, call: CallId) {
        self.sessions.remove(&call);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::event::CallIds;
    use std::net::Ipv4Addr;

    #[test]
    fn offer_carries_direction_and_version() {
        let call = CallIds::default().next();
        let mut media = NullMedia::new(Ipv4Addr::new(192, 0, 2, 10).into(), 4000);

        let first = media.create_offer(call, MediaDirection::SendRecv);
        let second = media.create_offer(call, MediaDirection::SendOnly);

        assert_eq!(sdp::direction(&first), MediaDirection::SendRecv);
        assert_eq!(sdp::direction(&second), MediaDirection::SendOnly);

        let first = std::str::from_utf8(&first).unwrap();
        let second = std::str::from_utf8(&second).unwrap();
        assert!(first.contains("o=- 1 1 IN IP4 192.0.2.10\r\n"));
        assert!(second.contains("o=- 1 2 IN IP4 192.0.2.10\r\n"));
        assert!(first.contains("m=audio 4000 RTP/AVP 0 8 101\r\n"));
    }

    #[test]
    fn answer_follows_offer() {
        let call = CallIds::default().next();
        let mut media = NullMedia::new(Ipv4Addr::LOCALHOST.into(), 4000);

        let hold = b"v=0\r\nm=audio 5000 RTP/AVP 0\r\na=sendonly\r\n";
        let answer = media
            .receive_offer(call, hold, MediaDirection::SendRecv)
            .unwrap();

        assert_eq!(sdp::direction(&answer), MediaDirection::RecvOnly);
        assert!(media.receive_offer(call, b"garbage", MediaDirection::SendRecv).is_err());
    }

    #[test]
    fn release_forgets_state() {
        let call = CallIds::default().next();
        let mut media = NullMedia::new(Ipv4Addr::LOCALHOST.into(), 4000);

        media.set_muted(call, true);
        media.set_hold(call, true);
        assert!(media.is_muted(call));
        assert!(media.is_held(call));

        media.release(call);
        assert!(!media.is_muted(call));
        assert_eq!(media.sessions(), 0);
    }
}

//! The small part of SDP the signaling engine has to understand: stream direction attributes

use std::fmt;
use std::str::from_utf8;

pub const CONTENT_TYPE_SDP: &str = "application/sdp";

/// Direction attribute of a media stream (RFC 4566 section 6, RFC 3264 section 5.1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MediaDirection {
    #[default]
    SendRecv,
    SendOnly,
    RecvOnly,
    Inactive,
}

impl MediaDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            MediaDirection::SendRecv => "sendrecv",
            MediaDirection::SendOnly => "sendonly",
            MediaDirection::RecvOnly => "recvonly",
            MediaDirection::Inactive => "inactive",
        }
    }

    fn from_attribute(attribute: &str) -> Option<Self> {
        match attribute.trim() {
            "sendrecv" => Some(MediaDirection::SendRecv),
            "sendonly" => Some(MediaDirection::SendOnly),
            "recvonly" => Some(MediaDirection::RecvOnly),
            "inactive" => Some(MediaDirection::Inactive),
            _ => None,
        }
    }

    fn sends(self) -> bool {
        matches!(self, MediaDirection::SendRecv | MediaDirection::SendOnly)
    }

    fn receives(self) -> bool {
        matches!(self, MediaDirection::SendRecv | MediaDirection::RecvOnly)
    }

    fn from_flags(send: bool, recv: bool) -> Self {
        match (send, recv) {
            (true, true) => MediaDirection::SendRecv,
            (true, false) => MediaDirection::SendOnly,
            (false, true) => MediaDirection::RecvOnly,
            (false, false) => MediaDirection::Inactive,
        }
    }

    /// Direction of an answer to an offer with `self`, given what the answerer wants to do
    pub fn answer(self, local: MediaDirection) -> MediaDirection {
        Self::from_flags(
            self.receives() && local.sends(),
            self.sends() && local.receives(),
        )
    }

    /// An offer with this direction puts the offerer's peer on hold
    pub fn is_hold(self) -> bool {
        !self.receives()
    }
}

impl fmt::Display for MediaDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Direction of the first audio stream, falling back to the session level attribute.
///
/// A connection address of `0.0.0.0` is the RFC 2543 way to put a call on hold and
/// reported as [`MediaDirection::Inactive`].
pub fn direction(sdp: &[u8]) -> MediaDirection {
    let Ok(sdp) = from_utf8(sdp) else {
        return MediaDirection::default();
    };

    let mut session = None;
    let mut media = None;
    let mut in_media = false;
    let mut null_connection = false;

    for line in sdp.lines() {
        let line = line.trim_end();

        if line.starts_with("m=") {
            if in_media {
                // only the first stream counts
                break;
            }

            in_media = true;
        } else if let Some(attribute) = line.strip_prefix("a=") {
            if let Some(direction) = MediaDirection::from_attribute(attribute) {
                if in_media {
                    media = Some(direction);
                } else {
                    session = Some(direction);
                }
            }
        } else if let Some(connection) = line.strip_prefix("c=") {
            null_connection = connection.trim() == "IN IP4 0.0.0.0";
        }
    }

    if null_connection {
        return MediaDirection::Inactive;
    }

    media.or(session).unwrap_or_default()
}

/// Replace every direction attribute in `sdp` with `direction`, adding one to each media
/// description that has none
pub fn with_direction(sdp: &str, direction: MediaDirection) -> String {
    let mut out = String::with_capacity(sdp.len() + 16);
    let mut in_media = false;
    let mut has_direction = false;

    let close_media = |out: &mut String, in_media: bool, has_direction: bool| {
        if in_media && !has_direction {
            out.push_str("a=");
            out.push_str(direction.as_str());
            out.push_str("\r\n");
        }
    };

    for line in sdp.lines() {
        if line.starts_with("m=") {
            close_media(&mut out, in_media, has_direction);
            in_media = true;
            has_direction = false;
        }

        if line
            .strip_prefix("a=")
            .and_then(MediaDirection::from_attribute)
            .is_some()
        {
            if in_media {
                has_direction = true;
                out.push_str("a=");
                out.push_str(direction.as_str());
                out.push_str("\r\n");
            }

            // session level attributes are dropped, the media level one wins
            continue;
        }

        out.push_str(line);
        out.push_str("\r\n");
    }

    close_media(&mut out, in_media, has_direction);

    out
}

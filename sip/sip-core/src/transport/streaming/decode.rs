use bytes::{Buf, Bytes, BytesMut};
use sip_types::Name;
use sip_types::msg::HeadLines;
use std::io;
use std::str::from_utf8;
use tokio_util::codec::Decoder;

const MAX_MSG_SIZE: usize = 64 * 1024;

#[derive(Debug, thiserror::Error)]
pub(crate) enum Error {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("receiving message too large")]
    MessageTooLarge,
    #[error("received message is malformed")]
    Malformed,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Item {
    /// One complete message, framed by its `Content-Length`
    Message(Bytes),
    KeepAliveRequest,
    KeepAliveResponse,
}

/// Splits a byte stream into messages
#[derive(Debug, Default)]
pub(crate) struct StreamingDecoder;

impl Decoder for StreamingDecoder {
    type Item = Item;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // strip leading newlines
        let whitespace_count = src.iter().take_while(|b| b.is_ascii_whitespace()).count();
        if whitespace_count > 0 {
            let is_keep_alive_request = src.starts_with(b"\r\n\r\n");
            let is_keep_alive_response = src.starts_with(b"\r\n");

            src.advance(whitespace_count);

            if is_keep_alive_request {
                return Ok(Some(Item::KeepAliveRequest));
            } else if is_keep_alive_response {
                return Ok(Some(Item::KeepAliveResponse));
            }
        }

        if src.len() > MAX_MSG_SIZE {
            src.clear();

            return Err(Error::MessageTooLarge);
        }

        let mut lines = HeadLines::new(src);
        let mut content_len = 0;

        for line in &mut lines {
            let Ok(line) = line else {
                // cannot parse complete message head yet
                return Ok(None);
            };

            // try to find content-length field
            // so the complete message size can be calculated
            let mut split = line.splitn(2, |&c| c == b':');

            let Some(name) = split.next() else {
                continue;
            };

            let name = from_utf8(name).map_err(|_| Error::Malformed)?;

            if Name::CONTENT_LENGTH == name.trim() {
                let value = split.next().ok_or(Error::Malformed)?;
                let value = from_utf8(value).map_err(|_| Error::Malformed)?;

                content_len = value
                    .trim()
                    .parse::<usize>()
                    .map_err(|_| Error::Malformed)?;

                if content_len > MAX_MSG_SIZE {
                    return Err(Error::MessageTooLarge);
                }
            }
        }

        let expected_complete_message_size = lines.head_end() + content_len;

        // if the message is not completely inside the buffer, allocate the rest
        // and return
        if src.len() < expected_complete_message_size {
            src.reserve(expected_complete_message_size - src.len());
            return Ok(None);
        }

        Ok(Some(Item::Message(
            src.split_to(expected_complete_message_size).freeze(),
        )))
    }
}

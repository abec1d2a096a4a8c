//! Line codec for the IRC control connection.

use bytes::{BufMut, BytesMut};
use encoding::{UTF_8, WINDOWS_1252};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, warn};

use crate::error::ProtocolError;
use crate::util::MAX_IRC_LINE_LEN;
use crate::Message;

/// Newline-framed IRC codec.
///
/// Lines are decoded as UTF-8, falling back to Windows-1252 when the bytes
/// are not valid UTF-8; XDCC bots frequently announce Latin-1 file names.
/// Unparsable and overlong lines are dropped so one bad line never ends the
/// session.
#[derive(Debug, Default)]
pub struct IrcCodec {
    /// Scan offset so partial lines are not searched twice.
    next_index: usize,
}

impl IrcCodec {
    /// Create a codec.
    pub fn new() -> Self {
        Self::default()
    }

    fn decode_line(bytes: &[u8]) -> String {
        let (text, _, malformed) = UTF_8.decode(bytes);
        if !malformed {
            return text.into_owned();
        }
        let (text, _, _) = WINDOWS_1252.decode(bytes);
        text.into_owned()
    }
}

impl Decoder for IrcCodec {
    type Item = Message;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, ProtocolError> {
        loop {
            let Some(offset) = src[self.next_index..].iter().position(|b| *b == b'\n') else {
                if src.len() > MAX_IRC_LINE_LEN {
                    warn!(len = src.len(), "discarding overlong line");
                    src.clear();
                    self.next_index = 0;
                }
                self.next_index = src.len();
                return Ok(None);
            };

            let line_end = self.next_index + offset;
            self.next_index = 0;
            let line = src.split_to(line_end + 1);
            let text = Self::decode_line(&line[..line_end]);

            if text.trim_end_matches('\r').is_empty() {
                continue;
            }
            match text.parse() {
                Ok(msg) => return Ok(Some(msg)),
                Err(e) => debug!("skipping unparsable line: {}", e),
            }
        }
    }
}

impl Encoder<Message> for IrcCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: Message, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let line = msg.to_string();
        if line.len() > MAX_IRC_LINE_LEN {
            return Err(ProtocolError::MessageTooLong(line.len()));
        }
        dst.reserve(line.len());
        dst.put(line.as_bytes());
        Ok(())
    }
}

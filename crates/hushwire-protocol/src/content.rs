//! Message content framing
//!
//! The content kind travels inside the encrypted plaintext as a one-byte
//! tag, so it is covered by the envelope MAC: `tag || body`.

use crate::error::{ProtocolError, Result};

const TAG_TEXT: u8 = 0x01;
const TAG_IMAGE: u8 = 0x02;
const TAG_AUDIO: u8 = 0x03;

/// Application payload carried by an envelope
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Content {
    /// UTF-8 text
    Text(String),
    /// Encoded image bytes
    Image(Vec<u8>),
    /// Encoded audio clip bytes
    Audio(Vec<u8>),
}

impl Content {
    /// Text content
    pub fn text(s: impl Into<String>) -> Self {
        Content::Text(s.into())
    }

    /// Kind name, for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Content::Text(_) => "text",
            Content::Image(_) => "image",
            Content::Audio(_) => "audio",
        }
    }

    /// Framed length in bytes
    pub fn encoded_len(&self) -> usize {
        1 + self.body().len()
    }

    /// Frame as `tag || body`
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.push(self.tag());
        out.extend_from_slice(self.body());
        out
    }

    /// Parse a framed plaintext
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let (&tag, body) = bytes
            .split_first()
            .ok_or_else(|| ProtocolError::Malformed("empty plaintext".to_string()))?;

        match tag {
            TAG_TEXT => String::from_utf8(body.to_vec())
                .map(Content::Text)
                .map_err(|_| ProtocolError::Malformed("text is not UTF-8".to_string())),
            TAG_IMAGE => Ok(Content::Image(body.to_vec())),
            TAG_AUDIO => Ok(Content::Audio(body.to_vec())),
            other => Err(ProtocolError::Malformed(format!("unknown content tag {:#04x}", other))),
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Content::Text(_) => TAG_TEXT,
            Content::Image(_) => TAG_IMAGE,
            Content::Audio(_) => TAG_AUDIO,
        }
    }

    fn body(&self) -> &[u8] {
        match self {
            Content::Text(s) => s.as_bytes(),
            Content::Image(b) | Content::Audio(b) => b,
        }
    }
}

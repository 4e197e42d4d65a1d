use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Width of the identity field on the wire, including the NUL terminator
pub const IDENTITY_FIELD_LEN: usize = 32;
/// Width of the text field on the wire, including the NUL terminator
pub const TEXT_FIELD_LEN: usize = 128;
pub const MAX_IDENTITY_LEN: usize = IDENTITY_FIELD_LEN - 1;
pub const MAX_TEXT_LEN: usize = TEXT_FIELD_LEN - 1;

const IDENTITY_OFFSET: usize = 1;
const TEXT_OFFSET: usize = IDENTITY_OFFSET + IDENTITY_FIELD_LEN;

/// Every frame occupies exactly this many bytes on the stream
pub const FRAME_SIZE: usize = TEXT_OFFSET + TEXT_FIELD_LEN;

/// Sender name used for notices generated by the server itself
pub const SYSTEM_IDENTITY: &str = "Server";

pub const DEFAULT_PORT: u16 = 8888;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Login,
    Chat,
    Quit,
    Who,
    PrivateChat,
}

impl FrameKind {
    /// Single-byte tag written at offset 0 of the record
    pub fn tag(self) -> u8 {
        match self {
            FrameKind::Login => b'L',
            FrameKind::Chat => b'C',
            FrameKind::Quit => b'Q',
            FrameKind::Who => b'W',
            FrameKind::PrivateChat => b'P',
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'L' => Some(FrameKind::Login),
            b'C' => Some(FrameKind::Chat),
            b'Q' => Some(FrameKind::Quit),
            b'W' => Some(FrameKind::Who),
            b'P' => Some(FrameKind::PrivateChat),
            _ => None,
        }
    }
}

/// Errors produced while reading or decoding frames
#[derive(Debug, Error)]
pub enum FrameError {
    /// The peer closed the stream before a whole frame arrived
    #[error("peer closed the connection")]
    PeerClosed,

    #[error("unknown frame type tag 0x{0:02x}")]
    UnknownKind(u8),

    #[error("{field} field is not valid UTF-8")]
    InvalidText { field: &'static str },

    #[error("record is {0} bytes, expected {size}", size = FRAME_SIZE)]
    Oversized(usize),

    #[error("transport error: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    pub fn is_peer_closed(&self) -> bool {
        matches!(self, FrameError::PeerClosed)
    }

    /// True for records that arrived whole but cannot be interpreted
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            FrameError::UnknownKind(_) | FrameError::InvalidText { .. } | FrameError::Oversized(_)
        )
    }
}

/// One protocol message: a type tag plus two bounded text fields
///
/// Fields are private so the width bounds hold for every constructed frame:
/// identities never exceed 31 bytes and text never exceeds 127 bytes.
/// Truncation happens on a character boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    identity: String,
    text: String,
}

impl Frame {
    pub fn new(kind: FrameKind, identity: &str, text: &str) -> Self {
        Self {
            kind,
            identity: bounded(identity, MAX_IDENTITY_LEN),
            text: bounded(text, MAX_TEXT_LEN),
        }
    }

    pub fn login(identity: &str) -> Self {
        Self::new(FrameKind::Login, identity, "")
    }

    pub fn chat(identity: &str, text: &str) -> Self {
        Self::new(FrameKind::Chat, identity, text)
    }

    pub fn quit(identity: &str) -> Self {
        Self::new(FrameKind::Quit, identity, "")
    }

    pub fn who(identity: &str) -> Self {
        Self::new(FrameKind::Who, identity, "")
    }

    /// Private message request; the text carries `<target> <message>`
    pub fn private_chat(identity: &str, target: &str, message: &str) -> Self {
        Self::new(
            FrameKind::PrivateChat,
            identity,
            &format!("{} {}", target, message),
        )
    }

    /// Chat frame sent on behalf of the server
    pub fn system(text: &str) -> Self {
        Self::chat(SYSTEM_IDENTITY, text)
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Replaces the identity field, keeping kind and text
    pub fn with_identity(mut self, identity: &str) -> Self {
        self.identity = bounded(identity, MAX_IDENTITY_LEN);
        self
    }

    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut buf = [0u8; FRAME_SIZE];
        buf[0] = self.kind.tag();

        let identity = self.identity.as_bytes();
        buf[IDENTITY_OFFSET..IDENTITY_OFFSET + identity.len()].copy_from_slice(identity);

        let text = self.text.as_bytes();
        buf[TEXT_OFFSET..TEXT_OFFSET + text.len()].copy_from_slice(text);

        buf
    }

    /// Decodes one fixed-size record
    ///
    /// Fewer than `FRAME_SIZE` bytes means the stream ended mid-record and is
    /// reported as `PeerClosed`. Each text field ends at its first NUL byte,
    /// or at the field width if none is present.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < FRAME_SIZE {
            return Err(FrameError::PeerClosed);
        }
        if bytes.len() > FRAME_SIZE {
            return Err(FrameError::Oversized(bytes.len()));
        }

        let kind = FrameKind::from_tag(bytes[0]).ok_or(FrameError::UnknownKind(bytes[0]))?;
        let identity = field_text(
            &bytes[IDENTITY_OFFSET..TEXT_OFFSET],
            MAX_IDENTITY_LEN,
            "identity",
        )?;
        let text = field_text(&bytes[TEXT_OFFSET..FRAME_SIZE], MAX_TEXT_LEN, "text")?;

        Ok(Self {
            kind,
            identity,
            text,
        })
    }
}

fn field_text(field: &[u8], max: usize, name: &'static str) -> Result<String, FrameError> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let raw = std::str::from_utf8(&field[..end])
        .map_err(|_| FrameError::InvalidText { field: name })?;
    Ok(bounded(raw, max))
}

/// Cuts `value` at its first NUL and then to at most `max` bytes
pub fn bounded(value: &str, max: usize) -> String {
    let value = match value.find('\0') {
        Some(nul) => &value[..nul],
        None => value,
    };
    if value.len() <= max {
        return value.to_string();
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    value[..end].to_string()
}

/// Reads exactly one frame from the stream
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; FRAME_SIZE];
    match reader.read_exact(&mut buf).await {
        Ok(_) => Frame::decode(&buf),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(FrameError::PeerClosed),
        Err(e) => Err(FrameError::Io(e)),
    }
}

pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame.encode()).await?;
    writer.flush().await?;
    Ok(())
}

//! The fixed-layout message header and async frame I/O.

use std::io::Cursor;

use num_traits::{FromPrimitive, ToPrimitive};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::{wire, Component, Error, MsgType, Result, MAX_PAYLOAD, NAME_LEN};

/// Encoded size of a header: three u16 tags, a u32 length, and the name
/// field.
pub const HEADER_LEN: usize = 2 + 2 + 2 + 4 + NAME_LEN;

/// Fixed message header: type, source, destination, payload length and a
/// NUL-terminated utility string (usually the file key).
#[derive(Debug, Clone)]
pub struct Header {
    pub msg_type: MsgType,
    pub source: Component,
    pub dest: Component,
    pub payload_len: u32,
    pub name: String,
}

impl Header {
    pub fn new(msg_type: MsgType, source: Component, dest: Component) -> Self {
        Self { msg_type, source, dest, payload_len: 0, name: String::new() }
    }

    pub fn with_name(
        msg_type: MsgType,
        source: Component,
        dest: Component,
        name: &str,
    ) -> Self {
        Self { msg_type, source, dest, payload_len: 0, name: name.to_owned() }
    }

    /// An error reply; the human-readable reason travels in the name
    /// field.
    pub fn error(source: Component, dest: Component, reason: &str) -> Self {
        let mut reason = reason.to_owned();
        reason.truncate(NAME_LEN - 1);
        Self { msg_type: MsgType::Error, source, dest, payload_len: 0, name: reason }
    }

    pub fn encode(&self) -> std::io::Result<[u8; HEADER_LEN]> {
        let mut buf = [0u8; HEADER_LEN];
        let mut cur = Cursor::new(&mut buf[..]);
        wire::put_u16(&mut cur, self.msg_type.to_u16().unwrap_or(0))?;
        wire::put_u16(&mut cur, self.source.to_u16().unwrap_or(0))?;
        wire::put_u16(&mut cur, self.dest.to_u16().unwrap_or(0))?;
        wire::put_u32(&mut cur, self.payload_len)?;
        wire::put_fixed_str::<NAME_LEN>(&mut cur, &self.name)?;
        Ok(buf)
    }

    pub fn decode(buf: &[u8; HEADER_LEN]) -> Result<Self> {
        let mut cur = Cursor::new(&buf[..]);
        let raw_type = wire::u16(&mut cur)?;
        let msg_type = MsgType::from_u16(raw_type).ok_or(Error::UnknownMsgType(raw_type))?;
        let raw_src = wire::u16(&mut cur)?;
        let source = Component::from_u16(raw_src).ok_or(Error::UnknownComponent(raw_src))?;
        let raw_dst = wire::u16(&mut cur)?;
        let dest = Component::from_u16(raw_dst).ok_or(Error::UnknownComponent(raw_dst))?;
        let payload_len = wire::u32(&mut cur)?;
        if payload_len > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge(payload_len));
        }
        let name = wire::fixed_str::<NAME_LEN>(&mut cur)?;
        Ok(Self { msg_type, source, dest, payload_len, name })
    }
}

/// Reads one header off the stream.
pub async fn read_header<S: AsyncRead + Unpin>(src: &mut S) -> Result<Header> {
    let mut buf = [0u8; HEADER_LEN];
    src.read_exact(&mut buf).await.map_err(Error::Io)?;
    Header::decode(&buf)
}

/// Reads a payload of exactly `len` bytes.
pub async fn read_payload<S: AsyncRead + Unpin>(src: &mut S, len: u32) -> Result<Vec<u8>> {
    if len > MAX_PAYLOAD {
        return Err(Error::PayloadTooLarge(len));
    }
    let mut buf = vec![0u8; len as usize];
    src.read_exact(&mut buf).await.map_err(Error::Io)?;
    Ok(buf)
}

/// Sends one message: header (with `payload_len` patched in) followed by
/// the payload bytes.
pub async fn write_message<S: AsyncWrite + Unpin>(
    dest: &mut S,
    mut header: Header,
    payload: &[u8],
) -> Result<()> {
    header.payload_len = payload.len() as u32;
    let encoded = header.encode().map_err(Error::Io)?;
    dest.write_all(&encoded).await.map_err(Error::Io)?;
    if !payload.is_empty() {
        dest.write_all(payload).await.map_err(Error::Io)?;
    }
    dest.flush().await.map_err(Error::Io)?;
    Ok(())
}

/// Reads one full message: header plus payload.
pub async fn read_message<S: AsyncRead + Unpin>(src: &mut S) -> Result<(Header, Vec<u8>)> {
    let header = read_header(src).await?;
    let payload = read_payload(src, header.payload_len).await?;
    Ok((header, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrip() {
        let header =
            Header::with_name(MsgType::Create, Component::Client, Component::NameServer, "notes");
        let buf = header.encode().unwrap();
        let decoded = Header::decode(&buf).unwrap();
        assert_eq!(decoded.msg_type, MsgType::Create);
        assert_eq!(decoded.source, Component::Client);
        assert_eq!(decoded.dest, Component::NameServer);
        assert_eq!(decoded.name, "notes");
    }

    #[test]
    fn unknown_type_rejected() {
        let header = Header::new(MsgType::Ack, Component::Client, Component::NameServer);
        let mut buf = header.encode().unwrap();
        buf[0] = 0xff;
        buf[1] = 0xff;
        assert!(matches!(Header::decode(&buf), Err(Error::UnknownMsgType(0xffff))));
    }

    #[test]
    fn oversized_payload_rejected() {
        let mut header = Header::new(MsgType::Ack, Component::Client, Component::NameServer);
        header.payload_len = MAX_PAYLOAD + 1;
        let buf = header.encode().unwrap();
        assert!(matches!(Header::decode(&buf), Err(Error::PayloadTooLarge(_))));
    }
}

//! Console wire frames.
//!
//! Every frame is laid out as
//!
//! ```text
//! | length: i32 LE | id: i32 LE | type: i32 LE | payload ... | 0x00 | 0x00 |
//! ```
//!
//! where `length` counts everything after itself. The fixed header is encoded
//! with bincode's little-endian fixed-width integers; the payload is raw bytes.
//! A long reply is split on character boundaries of the server's own string
//! type, so a fragment may end inside a UTF-8 sequence. Payloads therefore
//! stay bytes until the whole reply has been collected.

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Login request carrying the shared credential.
pub const PACKET_AUTH: i32 = 3;
/// Login acknowledgement from the server.
pub const PACKET_AUTH_RESPONSE: i32 = 2;
/// Command request. Shares its tag with the login acknowledgement; direction disambiguates.
pub const PACKET_EXEC_COMMAND: i32 = 2;
/// Command output fragment.
pub const PACKET_RESPONSE_VALUE: i32 = 0;

/// Id the server puts in the login acknowledgement when the credential is wrong.
pub const AUTH_REJECTED_ID: i32 = -1;

pub const HEADER_LEN: usize = 12;
pub const MAX_PAYLOAD_LEN: usize = 4096;
/// id + type + two null terminators
pub const MIN_FRAME_LEN: i32 = 10;
pub const MAX_FRAME_LEN: i32 = MAX_PAYLOAD_LEN as i32 + MIN_FRAME_LEN;
/// Servers split replies every 4096 characters, which can take up to four
/// bytes each.
pub const MAX_INBOUND_PAYLOAD_LEN: usize = 4 * MAX_PAYLOAD_LEN;
pub const MAX_INBOUND_FRAME_LEN: i32 = MAX_INBOUND_PAYLOAD_LEN as i32 + MIN_FRAME_LEN;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("frame length {0} is outside 10..=16394")]
    Length(i32),
    #[error("payload of {0} bytes exceeds the 4096 byte limit")]
    Oversized(usize),
    #[error("frame is not terminated by two null bytes")]
    Terminator,
    #[error("frame header codec failed: {0}")]
    Header(#[from] bincode::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
struct FrameHeader {
    length: i32,
    id: i32,
    kind: i32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub id: i32,
    pub kind: i32,
    pub body: Vec<u8>,
}

impl Packet {
    pub fn new(id: i32, kind: i32, body: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            kind,
            body: body.into(),
        }
    }

    /// The payload as text, with invalid sequences replaced.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let body = self.body.as_slice();
        if body.len() > MAX_PAYLOAD_LEN {
            return Err(FrameError::Oversized(body.len()));
        }

        let header = FrameHeader {
            length: body.len() as i32 + MIN_FRAME_LEN,
            id: self.id,
            kind: self.kind,
        };

        let mut frame = bincode::serialize(&header)?;
        frame.reserve(body.len() + 2);
        frame.extend_from_slice(body);
        frame.extend_from_slice(&[0, 0]);
        Ok(frame)
    }

    /// Decodes one frame from the front of `bytes`, returning the packet and
    /// the number of bytes it occupied.
    pub fn decode(bytes: &[u8]) -> Result<(Packet, usize), FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }

        let header = parse_header(&bytes[..HEADER_LEN])?;
        let total = 4 + header.length as usize;
        if bytes.len() < total {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }

        let packet = finish_packet(header, &bytes[HEADER_LEN..total])?;
        Ok((packet, total))
    }
}

fn parse_header(bytes: &[u8]) -> Result<FrameHeader, FrameError> {
    let header: FrameHeader = bincode::deserialize(bytes)?;
    if header.length < MIN_FRAME_LEN || header.length > MAX_INBOUND_FRAME_LEN {
        return Err(FrameError::Length(header.length));
    }
    Ok(header)
}

fn finish_packet(header: FrameHeader, rest: &[u8]) -> Result<Packet, FrameError> {
    let (body, terminator) = rest.split_at(rest.len() - 2);
    if terminator != [0, 0] {
        return Err(FrameError::Terminator);
    }

    Ok(Packet {
        id: header.id,
        kind: header.kind,
        body: body.to_vec(),
    })
}

pub async fn read_packet<R>(reader: &mut R) -> Result<Packet, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut header_bytes = [0u8; HEADER_LEN];
    reader.read_exact(&mut header_bytes).await?;
    let header = parse_header(&header_bytes)?;

    // length covers id and type, which are already consumed
    let mut rest = vec![0u8; header.length as usize - 8];
    reader.read_exact(&mut rest).await?;

    finish_packet(header, &rest)
}

pub async fn write_packet<W>(writer: &mut W, packet: &Packet) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    let frame = packet.encode()?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_layout() {
        let packet = Packet::new(7, PACKET_EXEC_COMMAND, "list");
        let frame = packet.encode().unwrap();

        assert_eq!(frame.len(), 4 + 4 + 4 + 4 + 2);
        assert_eq!(&frame[0..4], &14i32.to_le_bytes());
        assert_eq!(&frame[4..8], &7i32.to_le_bytes());
        assert_eq!(&frame[8..12], &2i32.to_le_bytes());
        assert_eq!(&frame[12..16], b"list");
        assert_eq!(&frame[16..], &[0, 0]);
    }

    #[test]
    fn test_empty_payload_frame() {
        let frame = Packet::new(1, PACKET_RESPONSE_VALUE, "").encode().unwrap();

        assert_eq!(frame.len(), 14);
        assert_eq!(&frame[0..4], &10i32.to_le_bytes());
    }

    #[test]
    fn test_decode_reports_consumed_length() {
        let mut bytes = Packet::new(3, PACKET_RESPONSE_VALUE, "first")
            .encode()
            .unwrap();
        bytes.extend(
            Packet::new(3, PACKET_RESPONSE_VALUE, "second")
                .encode()
                .unwrap(),
        );

        let (first, used) = Packet::decode(&bytes).unwrap();
        assert_eq!(first.text(), "first");

        let (second, _) = Packet::decode(&bytes[used..]).unwrap();
        assert_eq!(second.text(), "second");
    }

    #[test]
    fn test_negative_id_survives_encoding() {
        let frame = Packet::new(AUTH_REJECTED_ID, PACKET_AUTH_RESPONSE, "")
            .encode()
            .unwrap();
        let (packet, _) = Packet::decode(&frame).unwrap();

        assert_eq!(packet.id, -1);
        assert_eq!(packet.kind, PACKET_AUTH_RESPONSE);
    }

    #[test]
    fn test_oversized_payload_rejected() {
        let body = "x".repeat(MAX_PAYLOAD_LEN + 1);
        let result = Packet::new(1, PACKET_EXEC_COMMAND, body).encode();

        assert!(matches!(result, Err(FrameError::Oversized(4097))));
    }

    #[test]
    fn test_short_length_rejected() {
        let mut frame = Packet::new(1, PACKET_RESPONSE_VALUE, "").encode().unwrap();
        frame[0..4].copy_from_slice(&9i32.to_le_bytes());

        assert!(matches!(Packet::decode(&frame), Err(FrameError::Length(9))));
    }

    #[test]
    fn test_missing_terminator_rejected() {
        let mut frame = Packet::new(1, PACKET_RESPONSE_VALUE, "ok")
            .encode()
            .unwrap();
        let last = frame.len() - 1;
        frame[last] = b'!';

        assert!(matches!(Packet::decode(&frame), Err(FrameError::Terminator)));
    }

    #[test]
    fn test_truncated_frame() {
        let frame = Packet::new(1, PACKET_RESPONSE_VALUE, "truncated")
            .encode()
            .unwrap();

        match Packet::decode(&frame[..frame.len() - 3]) {
            Err(FrameError::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("Expected eof, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_read_packet_from_stream() {
        let text = "There are 0 of a max of 20 players online";
        let frame = Packet::new(42, PACKET_RESPONSE_VALUE, text)
            .encode()
            .unwrap();
        let mut stream = tokio_test::io::Builder::new().read(&frame).build();

        let packet = read_packet(&mut stream).await.unwrap();
        assert_eq!(packet.id, 42);
        assert_eq!(packet.text(), text);
    }

    /// Builds a frame by hand, bypassing the outgoing payload limit.
    fn raw_frame(id: i32, kind: i32, body: &[u8]) -> Vec<u8> {
        let mut frame = Vec::new();
        frame.extend_from_slice(&(body.len() as i32 + MIN_FRAME_LEN).to_le_bytes());
        frame.extend_from_slice(&id.to_le_bytes());
        frame.extend_from_slice(&kind.to_le_bytes());
        frame.extend_from_slice(body);
        frame.extend_from_slice(&[0, 0]);
        frame
    }

    #[tokio::test]
    async fn test_reads_fragment_longer_than_outgoing_limit() {
        let body = "é".repeat(3000);
        let frame = raw_frame(8, PACKET_RESPONSE_VALUE, body.as_bytes());
        let mut stream = tokio_test::io::Builder::new().read(&frame).build();

        let packet = read_packet(&mut stream).await.unwrap();
        assert_eq!(packet.body.len(), 6000);
        assert_eq!(packet.text(), body);
    }

    #[test]
    fn test_inbound_length_is_still_bounded() {
        let mut frame = raw_frame(8, PACKET_RESPONSE_VALUE, b"x");
        frame[0..4].copy_from_slice(&(MAX_INBOUND_FRAME_LEN + 1).to_le_bytes());

        assert!(matches!(Packet::decode(&frame), Err(FrameError::Length(16395))));
    }

    #[test]
    fn test_payload_keeps_partial_utf8() {
        let frame = raw_frame(2, PACKET_RESPONSE_VALUE, &[b'h', 0xC3]);
        let (packet, _) = Packet::decode(&frame).unwrap();

        assert_eq!(packet.body, vec![b'h', 0xC3]);
    }

    #[tokio::test]
    async fn test_write_packet_to_stream() {
        let packet = Packet::new(5, PACKET_AUTH, "secret");
        let expected = packet.encode().unwrap();
        let mut stream = tokio_test::io::Builder::new().write(&expected).build();

        write_packet(&mut stream, &packet).await.unwrap();
    }
}

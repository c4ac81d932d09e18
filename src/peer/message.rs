//! Peer-wire framing: length-prefixed, id-tagged messages exchanged after the
//! handshake.
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("unknown message id: {0}")]
    UnknownMessageId(u8),

    #[error("payload length {actual} inconsistent with message id {id} (expected {expected})")]
    InconsistentLength { id: u8, expected: usize, actual: usize },

    #[error("message body too short for its id")]
    TooShort,

    #[error("handshake protocol identifier mismatch")]
    HandshakeInvalidProtocol,

    #[error("no bytes read within the idle timeout")]
    IdleTimeout,
}

pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// A decoded peer-wire message. `KeepAlive` is the zero-length frame; every
/// other variant corresponds to one message id (§4.4).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    KeepAlive,
    Choke,
    Unchoke,
    Interested,
    NotInterested,
    Have(u32),
    BitField(Vec<u8>),
    Request(u32, u32, u32),
    Piece(u32, u32, Vec<u8>),
    Cancel(u32, u32, u32),
    Port(u16),
}

impl Message {
    pub fn id(&self) -> Option<u8> {
        match self {
            Message::KeepAlive => None,
            Message::Choke => Some(0),
            Message::Unchoke => Some(1),
            Message::Interested => Some(2),
            Message::NotInterested => Some(3),
            Message::Have(_) => Some(4),
            Message::BitField(_) => Some(5),
            Message::Request(..) => Some(6),
            Message::Piece(..) => Some(7),
            Message::Cancel(..) => Some(8),
            Message::Port(_) => Some(9),
        }
    }

    /// Length of the message body (id byte + payload), i.e. what goes in the
    /// `u32` length prefix. Kept as `u32` throughout — a prior draft of this
    /// framing cast the prefix through `u8`, silently truncating any
    /// `BitField`/`Piece` payload over 255 bytes.
    fn body_len(&self) -> u32 {
        match self {
            Message::KeepAlive => 0,
            Message::Choke | Message::Unchoke | Message::Interested | Message::NotInterested => 1,
            Message::Have(_) => 5,
            Message::BitField(bits) => 1 + bits.len() as u32,
            Message::Request(..) | Message::Cancel(..) => 13,
            Message::Piece(_, _, block) => 9 + block.len() as u32,
            Message::Port(_) => 3,
        }
    }

    /// Serializes this message onto the wire, length-prefix included.
    pub fn encode(&self) -> BytesMut {
        let body_len = self.body_len();
        let mut buf = BytesMut::with_capacity(4 + body_len as usize);
        buf.put_u32(body_len);

        match self {
            Message::KeepAlive => {}
            Message::Choke => buf.put_u8(0),
            Message::Unchoke => buf.put_u8(1),
            Message::Interested => buf.put_u8(2),
            Message::NotInterested => buf.put_u8(3),
            Message::Have(index) => {
                buf.put_u8(4);
                buf.put_u32(*index);
            }
            Message::BitField(bits) => {
                buf.put_u8(5);
                buf.put_slice(bits);
            }
            Message::Request(index, begin, length) => {
                buf.put_u8(6);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Piece(index, begin, block) => {
                buf.put_u8(7);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_slice(block);
            }
            Message::Cancel(index, begin, length) => {
                buf.put_u8(8);
                buf.put_u32(*index);
                buf.put_u32(*begin);
                buf.put_u32(*length);
            }
            Message::Port(port) => {
                buf.put_u8(9);
                buf.put_u16(*port);
            }
        }

        buf
    }

    /// Parses a message body (everything after the 4-byte length prefix,
    /// `len` bytes long) into a [`Message`]. An empty body is `KeepAlive`.
    pub fn decode_body(body: &[u8]) -> ProtocolResult<Message> {
        if body.is_empty() {
            return Ok(Message::KeepAlive);
        }

        let id = body[0];
        let payload = &body[1..];

        let expect = |expected: usize| -> ProtocolResult<()> {
            if payload.len() != expected {
                Err(ProtocolError::InconsistentLength {
                    id,
                    expected: expected + 1,
                    actual: body.len(),
                })
            } else {
                Ok(())
            }
        };

        match id {
            0 => {
                expect(0)?;
                Ok(Message::Choke)
            }
            1 => {
                expect(0)?;
                Ok(Message::Unchoke)
            }
            2 => {
                expect(0)?;
                Ok(Message::Interested)
            }
            3 => {
                expect(0)?;
                Ok(Message::NotInterested)
            }
            4 => {
                expect(4)?;
                Ok(Message::Have(BigEndian::read_u32(payload)))
            }
            5 => Ok(Message::BitField(payload.to_vec())),
            6 => {
                expect(12)?;
                Ok(Message::Request(
                    BigEndian::read_u32(&payload[0..4]),
                    BigEndian::read_u32(&payload[4..8]),
                    BigEndian::read_u32(&payload[8..12]),
                ))
            }
            7 => {
                if payload.len() < 8 {
                    return Err(ProtocolError::TooShort);
                }
                Ok(Message::Piece(
                    BigEndian::read_u32(&payload[0..4]),
                    BigEndian::read_u32(&payload[4..8]),
                    payload[8..].to_vec(),
                ))
            }
            8 => {
                expect(12)?;
                Ok(Message::Cancel(
                    BigEndian::read_u32(&payload[0..4]),
                    BigEndian::read_u32(&payload[4..8]),
                    BigEndian::read_u32(&payload[8..12]),
                ))
            }
            9 => {
                // Accept either a u16 or u32-width Port payload (§4.4); always
                // emit the canonical u16 form ourselves.
                match payload.len() {
                    2 => Ok(Message::Port(BigEndian::read_u16(payload))),
                    4 => Ok(Message::Port(BigEndian::read_u32(payload) as u16)),
                    _ => Err(ProtocolError::InconsistentLength { id, expected: 3, actual: body.len() }),
                }
            }
            other => Err(ProtocolError::UnknownMessageId(other)),
        }
    }

    /// Reads one full frame from `reader`: the 4-byte length prefix, then
    /// exactly that many body bytes, looping until both are read in full.
    pub async fn read_from<R: AsyncRead + Unpin>(reader: &mut R) -> ProtocolResult<Message> {
        let mut length_buf = [0u8; 4];
        reader.read_exact(&mut length_buf).await?;
        let length = BigEndian::read_u32(&length_buf) as usize;

        if length == 0 {
            return Ok(Message::KeepAlive);
        }

        let mut body = vec![0u8; length];
        reader.read_exact(&mut body).await?;
        Message::decode_body(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_have() {
        let msg = Message::Have(42);
        let encoded = msg.encode();
        let decoded = Message::decode_body(&encoded[4..]).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn keep_alive_is_zero_length() {
        let msg = Message::KeepAlive;
        assert_eq!(&msg.encode()[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn bitfield_over_255_bytes_round_trips() {
        let bits = vec![0xffu8; 300];
        let msg = Message::BitField(bits.clone());
        let encoded = msg.encode();
        assert_eq!(BigEndian::read_u32(&encoded[0..4]), 301);
        let decoded = Message::decode_body(&encoded[4..]).unwrap();
        assert_eq!(decoded, Message::BitField(bits));
    }

    #[test]
    fn piece_over_255_bytes_round_trips() {
        let block = vec![0xabu8; 16384];
        let msg = Message::Piece(1, 0, block.clone());
        let encoded = msg.encode();
        assert_eq!(BigEndian::read_u32(&encoded[0..4]), 9 + 16384);
        let decoded = Message::decode_body(&encoded[4..]).unwrap();
        assert_eq!(decoded, Message::Piece(1, 0, block));
    }

    #[test]
    fn rejects_have_with_wrong_length() {
        let err = Message::decode_body(&[4, 0, 0]).unwrap_err();
        assert!(matches!(err, ProtocolError::InconsistentLength { .. }));
    }

    #[test]
    fn rejects_unknown_id() {
        let err = Message::decode_body(&[200]).unwrap_err();
        assert!(matches!(err, ProtocolError::UnknownMessageId(200)));
    }

    #[test]
    fn port_accepts_both_widths() {
        assert_eq!(
            Message::decode_body(&[9, 0x1a, 0xe1]).unwrap(),
            Message::Port(6881)
        );
        assert_eq!(
            Message::decode_body(&[9, 0, 0, 0x1a, 0xe1]).unwrap(),
            Message::Port(6881)
        );
    }
}

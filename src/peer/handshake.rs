//! The fixed 68-byte BitTorrent handshake, exchanged before any framed
//! message and used to confirm both sides are talking about the same
//! torrent.
use crate::peer::message::ProtocolError;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::instrument;

pub const PROTOCOL_STRING: &[u8; 19] = b"BitTorrent protocol";

/// A BitTorrent handshake: protocol identifier, 8 reserved bytes, info-hash,
/// peer-id. Unlike every other peer-wire frame, this one is neither
/// length-prefixed nor id-tagged — its leading byte (always `19`) is what
/// lets a reader tell it apart from a normal frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        Self { info_hash, peer_id }
    }

    /// Serializes this handshake into its fixed 68-byte wire form.
    #[instrument(level = "trace")]
    pub fn serialize(&self) -> [u8; 68] {
        let mut buf = [0u8; 68];
        buf[0] = 19;
        buf[1..20].copy_from_slice(PROTOCOL_STRING);
        buf[20..28].copy_from_slice(&[0u8; 8]);
        buf[28..48].copy_from_slice(&self.info_hash);
        buf[48..68].copy_from_slice(&self.peer_id);
        buf
    }

    /// Reads and validates a handshake from `stream`, without checking the
    /// info-hash (callers that know what they expect should call
    /// [`Handshake::validate`] themselves).
    #[instrument(level = "trace", skip(stream))]
    async fn read(stream: &mut TcpStream) -> Result<Self, ProtocolError> {
        let mut length_buf = [0u8; 1];
        stream.read_exact(&mut length_buf).await?;
        if length_buf[0] != 19 {
            return Err(ProtocolError::HandshakeInvalidProtocol);
        }

        let mut buf = [0u8; 67];
        stream.read_exact(&mut buf).await?;

        if &buf[0..19] != PROTOCOL_STRING.as_slice() {
            return Err(ProtocolError::HandshakeInvalidProtocol);
        }

        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&buf[27..47]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&buf[47..67]);

        Ok(Self { info_hash, peer_id })
    }

    /// `Ok` iff this handshake's info-hash matches `expected_info_hash`.
    pub fn validate(&self, expected_info_hash: [u8; 20]) -> Result<(), ProtocolError> {
        if self.info_hash != expected_info_hash {
            return Err(ProtocolError::HandshakeInvalidProtocol);
        }
        Ok(())
    }

    /// Connects to `peer_addr`, exchanges handshakes, and returns the peer's
    /// handshake once its info-hash has been checked against ours.
    #[instrument(level = "debug", skip(info_hash, peer_id))]
    pub async fn perform(
        peer_addr: SocketAddr,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
    ) -> Result<(TcpStream, Handshake), ProtocolError> {
        let mut stream = TcpStream::connect(peer_addr).await?;

        let ours = Handshake::new(info_hash, peer_id);
        stream.write_all(&ours.serialize()).await?;

        let theirs = Handshake::read(&mut stream).await?;
        theirs.validate(info_hash)?;

        Ok((stream, theirs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_to_68_bytes() {
        let hs = Handshake::new([1u8; 20], [2u8; 20]);
        let bytes = hs.serialize();
        assert_eq!(bytes.len(), 68);
        assert_eq!(bytes[0], 19);
        assert_eq!(&bytes[1..20], PROTOCOL_STRING.as_slice());
        assert_eq!(&bytes[28..48], &[1u8; 20]);
        assert_eq!(&bytes[48..68], &[2u8; 20]);
    }

    #[test]
    fn validate_rejects_mismatched_info_hash() {
        let hs = Handshake::new([1u8; 20], [2u8; 20]);
        assert!(hs.validate([9u8; 20]).is_err());
        assert!(hs.validate([1u8; 20]).is_ok());
    }
}

//! Swarm coordinator (C7): the single actor that owns piece/block state and
//! per-peer availability, reached only through [`SwarmHandle`]'s command
//! channel. Peer sessions never touch this state directly.
use crate::piece::Piece;
use crate::torrent::file::TorrentFile;
use std::collections::HashMap;
use std::net::SocketAddr;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::instrument;

/// A block a session should request next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRequest {
    pub index: u32,
    pub begin: u32,
    pub length: u32,
}

/// Receives assembled, verified piece bytes. On-disk assembly is out of
/// scope for this core; this trait is the seam a real writer plugs into.
pub trait PieceWriter: Send + 'static {
    fn write_piece(&mut self, piece_index: usize, data: &[u8]);
}

/// A [`PieceWriter`] that only logs — useful until a real on-disk assembler
/// is wired in.
pub struct LoggingPieceWriter;

impl PieceWriter for LoggingPieceWriter {
    fn write_piece(&mut self, piece_index: usize, data: &[u8]) {
        tracing::info!(piece_index, bytes = data.len(), "piece verified");
    }
}

#[derive(Debug)]
enum Command {
    PeerBitField { peer: SocketAddr, bits: Vec<u8> },
    PeerHave { peer: SocketAddr, index: u32 },
    PeerChoked { peer: SocketAddr },
    PeerDisconnected { peer: SocketAddr },
    RequestBlock { peer: SocketAddr, respond_to: oneshot::Sender<Option<BlockRequest>> },
    DeliverBlock { peer: SocketAddr, index: u32, begin: u32, data: Vec<u8> },
}

/// Cheaply-cloneable handle to a running coordinator, for peer sessions.
#[derive(Clone)]
pub struct SwarmHandle {
    tx: mpsc::Sender<Command>,
}

impl SwarmHandle {
    pub async fn peer_bitfield(&self, peer: SocketAddr, bits: Vec<u8>) {
        let _ = self.tx.send(Command::PeerBitField { peer, bits }).await;
    }

    pub async fn peer_have(&self, peer: SocketAddr, index: u32) {
        let _ = self.tx.send(Command::PeerHave { peer, index }).await;
    }

    /// Tells the coordinator this peer choked us: any block currently
    /// assigned to it is released back to `Missing` so another peer can
    /// serve it (§4.5 — Choke suspends outstanding Requests for the peer).
    pub async fn peer_choked(&self, peer: SocketAddr) {
        let _ = self.tx.send(Command::PeerChoked { peer }).await;
    }

    pub async fn peer_disconnected(&self, peer: SocketAddr) {
        let _ = self.tx.send(Command::PeerDisconnected { peer }).await;
    }

    /// Asks the coordinator for a block this peer has that no one else is
    /// currently fetching. Returns `None` if there is nothing to request
    /// right now (everything outstanding, or the peer has nothing missing).
    pub async fn request_block(&self, peer: SocketAddr) -> Option<BlockRequest> {
        let (respond_to, rx) = oneshot::channel();
        self.tx.send(Command::RequestBlock { peer, respond_to }).await.ok()?;
        rx.await.ok().flatten()
    }

    pub async fn deliver_block(&self, peer: SocketAddr, index: u32, begin: u32, data: Vec<u8>) {
        let _ = self.tx.send(Command::DeliverBlock { peer, index, begin, data }).await;
    }
}

/// The actor itself. Construct with [`Coordinator::new`], then spawn
/// [`Coordinator::run`] as its own task; interact only via the
/// [`SwarmHandle`] returned alongside it.
pub struct Coordinator<W: PieceWriter> {
    pieces: Vec<Piece>,
    availability: HashMap<SocketAddr, Vec<bool>>,
    /// Blocks currently assigned to each peer, `(piece_index, block_offset)`
    /// — consulted on disconnect so only that peer's own in-flight requests
    /// are released back to `Missing`, per §4.7.
    assigned: HashMap<SocketAddr, Vec<(usize, u32)>>,
    rx: mpsc::Receiver<Command>,
    writer: W,
    completion_tx: watch::Sender<bool>,
}

impl<W: PieceWriter> Coordinator<W> {
    pub fn new(torrent: &TorrentFile, writer: W) -> (Self, SwarmHandle, watch::Receiver<bool>) {
        let pieces = torrent
            .pieces_hash
            .iter()
            .enumerate()
            .map(|(index, hash)| Piece::new(index, *hash, torrent.piece_size(index) as u32))
            .collect();

        let (tx, rx) = mpsc::channel(256);
        let (completion_tx, completion_rx) = watch::channel(false);

        let coordinator = Coordinator {
            pieces,
            availability: HashMap::new(),
            assigned: HashMap::new(),
            rx,
            writer,
            completion_tx,
        };

        (coordinator, SwarmHandle { tx }, completion_rx)
    }

    fn is_complete(&self) -> bool {
        self.pieces.iter().all(|p| p.verified)
    }

    /// Releases every block currently assigned to `peer` back to `Missing`,
    /// without touching its availability entry.
    fn release_assigned(&mut self, peer: &SocketAddr) {
        if let Some(blocks) = self.assigned.remove(peer) {
            for (piece_index, offset) in blocks {
                if let Some(piece) = self.pieces.get_mut(piece_index) {
                    piece.release_pending(offset);
                }
            }
        }
    }

    /// Ascending-index scan for the first piece with a missing block the
    /// peer claims to have. Rarest-first is a known future improvement; this
    /// is the minimal correct policy.
    fn assign_block(&mut self, peer: &SocketAddr) -> Option<BlockRequest> {
        if !self.availability.contains_key(peer) {
            return None;
        }
        for piece in &mut self.pieces {
            if piece.verified {
                continue;
            }
            if !self.availability.get(peer).and_then(|bits| bits.get(piece.index)).copied().unwrap_or(false) {
                continue;
            }
            if let Some((begin, length)) = piece.next_missing_block() {
                self.assigned.entry(*peer).or_default().push((piece.index, begin));
                return Some(BlockRequest { index: piece.index as u32, begin, length });
            }
        }
        None
    }

    #[instrument(skip_all)]
    pub async fn run(mut self) {
        while let Some(command) = self.rx.recv().await {
            match command {
                Command::PeerBitField { peer, bits } => {
                    let mut flags = vec![false; self.pieces.len()];
                    for (byte_index, byte) in bits.iter().enumerate() {
                        for bit in 0..8 {
                            let piece_index = byte_index * 8 + bit;
                            if piece_index >= flags.len() {
                                break;
                            }
                            if byte & (0x80 >> bit) != 0 {
                                flags[piece_index] = true;
                            }
                        }
                    }
                    self.availability.insert(peer, flags);
                }
                Command::PeerHave { peer, index } => {
                    let flags = self
                        .availability
                        .entry(peer)
                        .or_insert_with(|| vec![false; self.pieces.len()]);
                    if let Some(slot) = flags.get_mut(index as usize) {
                        *slot = true;
                    }
                }
                Command::PeerChoked { peer } => {
                    self.release_assigned(&peer);
                }
                Command::PeerDisconnected { peer } => {
                    self.availability.remove(&peer);
                    self.release_assigned(&peer);
                }
                Command::RequestBlock { peer, respond_to } => {
                    let block = self.assign_block(&peer);
                    let _ = respond_to.send(block);
                }
                Command::DeliverBlock { peer, index, begin, data } => {
                    if let Some(blocks) = self.assigned.get_mut(&peer) {
                        blocks.retain(|&(piece_index, offset)| {
                            !(piece_index == index as usize && offset == begin)
                        });
                    }
                    let Some(piece) = self.pieces.get_mut(index as usize) else {
                        tracing::debug!(index, "delivered block for unknown piece index");
                        continue;
                    };
                    piece.deliver_block(begin, data);
                    if piece.is_complete() {
                        if let Some(bytes) = piece.verify() {
                            self.writer.write_piece(index as usize, &bytes);
                        }
                    }
                }
            }

            if self.is_complete() {
                let _ = self.completion_tx.send(true);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingWriter {
        written: Vec<usize>,
    }

    impl PieceWriter for CountingWriter {
        fn write_piece(&mut self, piece_index: usize, _data: &[u8]) {
            self.written.push(piece_index);
        }
    }

    fn torrent_with_pieces(hashes: Vec<[u8; 20]>, piece_length: i64) -> TorrentFile {
        use crate::torrent::file::InfoDict;
        TorrentFile {
            announce: "http://tracker".to_string(),
            announce_list: Vec::new(),
            creation_date: None,
            comment: String::new(),
            created_by: String::new(),
            encoding: String::new(),
            info: InfoDict {
                piece_length,
                pieces: hashes.iter().flatten().copied().collect(),
                private: false,
                name: "f".to_string(),
                length: Some(piece_length * hashes.len() as i64),
                files: Vec::new(),
                is_directory: false,
            },
            info_hash: [0u8; 20],
            pieces_hash: hashes,
        }
    }

    #[tokio::test]
    async fn peer_bitfield_then_disconnect_clears_availability() {
        let torrent = torrent_with_pieces(vec![[0u8; 20]], 16);
        let (coordinator, handle, _completion) =
            Coordinator::new(&torrent, CountingWriter { written: Vec::new() });
        tokio::spawn(coordinator.run());

        let peer: SocketAddr = "127.0.0.1:6881".parse().unwrap();
        handle.peer_bitfield(peer, vec![0x80]).await;
        let request = handle.request_block(peer).await;
        assert!(request.is_some());

        handle.peer_disconnected(peer).await;
        // after disconnect, the block reassigned to nobody is Missing again,
        // but there is no longer any peer availability entry.
        let request = handle.request_block(peer).await;
        assert!(request.is_none());
    }

    #[tokio::test]
    async fn choke_releases_assigned_block_but_keeps_availability() {
        let torrent = torrent_with_pieces(vec![[0u8; 20], [0u8; 20]], 16);
        let (coordinator, handle, _completion) =
            Coordinator::new(&torrent, CountingWriter { written: Vec::new() });
        tokio::spawn(coordinator.run());

        let peer: SocketAddr = "127.0.0.1:6881".parse().unwrap();
        handle.peer_bitfield(peer, vec![0xc0]).await;
        let first = handle.request_block(peer).await;
        assert!(first.is_some());

        handle.peer_choked(peer).await;

        // availability survives a choke, so the same peer can be re-assigned
        // the block it was choked mid-request on.
        let reassigned = handle.request_block(peer).await;
        assert_eq!(reassigned, first);
    }

    #[tokio::test]
    async fn delivering_every_block_verifies_and_writes_piece() {
        use sha1::{Digest, Sha1};
        let data = b"0123456789abcdef".to_vec(); // 16 bytes, one block
        let mut hasher = Sha1::new();
        hasher.update(&data);
        let digest = hasher.finalize();
        let mut hash = [0u8; 20];
        hash.copy_from_slice(&digest);

        let torrent = torrent_with_pieces(vec![hash], 16);
        let (coordinator, handle, mut completion) =
            Coordinator::new(&torrent, CountingWriter { written: Vec::new() });
        tokio::spawn(coordinator.run());

        let peer: SocketAddr = "127.0.0.1:6881".parse().unwrap();
        handle.peer_bitfield(peer, vec![0x80]).await;
        let request = handle.request_block(peer).await.unwrap();
        handle.deliver_block(peer, request.index, request.begin, data).await;

        completion.changed().await.unwrap();
        assert!(*completion.borrow());
    }
}

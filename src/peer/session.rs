//! One peer's TCP connection: handshake, then a read loop that updates local
//! choke/interest state, drives the swarm coordinator, and requests blocks
//! (C5).
use crate::peer::handshake::Handshake;
use crate::peer::message::{Message, ProtocolError};
use crate::swarm::SwarmHandle;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::instrument;

/// Conventional peer-wire keep-alive interval (§5). A session that reads no
/// bytes for twice this long is considered stalled and is cancelled.
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(120);
const IDLE_TIMEOUT: Duration = Duration::from_secs(KEEPALIVE_INTERVAL.as_secs() * 2);

/// Local choke/interest state for one connection (§4.5, §3).
#[derive(Debug, Clone, Copy)]
pub struct PeerState {
    pub am_choking: bool,
    pub am_interested: bool,
    pub peer_choking: bool,
    pub peer_interested: bool,
}

impl Default for PeerState {
    fn default() -> Self {
        PeerState {
            am_choking: true,
            am_interested: false,
            peer_choking: true,
            peer_interested: false,
        }
    }
}

pub struct Session {
    addr: SocketAddr,
    stream: TcpStream,
    state: PeerState,
    swarm: SwarmHandle,
    outstanding: Option<(u32, u32, u32)>,
    completion: watch::Receiver<bool>,
}

impl Session {
    /// Connects to `addr`, performs the handshake, and — on success — sends
    /// Interested immediately, matching the contract that a session becomes
    /// interested as soon as it is handshaked.
    ///
    /// `completion` is the coordinator's completion signal (see
    /// [`crate::swarm::Coordinator::new`]); once it flips to `true` the read
    /// loop sends NotInterested and winds the session down instead of
    /// requesting further blocks.
    #[instrument(skip(swarm, completion), fields(peer = %addr))]
    pub async fn connect(
        addr: SocketAddr,
        info_hash: [u8; 20],
        peer_id: [u8; 20],
        swarm: SwarmHandle,
        completion: watch::Receiver<bool>,
    ) -> Result<Self, ProtocolError> {
        let (mut stream, _their_handshake) = Handshake::perform(addr, info_hash, peer_id).await?;

        let mut state = PeerState::default();
        state.am_interested = true;
        stream.write_all(&Message::Interested.encode()).await?;

        Ok(Session { addr, stream, state, swarm, outstanding: None, completion })
    }

    /// Runs the read loop until the connection closes, a protocol error
    /// occurs, or the download completes. On return, the swarm coordinator
    /// has already been told this peer disconnected.
    #[instrument(skip(self), fields(peer = %self.addr))]
    pub async fn run(mut self) {
        let result = self.read_loop().await;
        if let Err(error) = &result {
            tracing::warn!(peer = %self.addr, %error, "peer session ending");
        }
        self.swarm.peer_disconnected(self.addr).await;
    }

    async fn read_loop(&mut self) -> Result<(), ProtocolError> {
        loop {
            if *self.completion.borrow() {
                self.state.am_interested = false;
                let _ = self.stream.write_all(&Message::NotInterested.encode()).await;
                return Ok(());
            }

            tokio::select! {
                biased;

                changed = self.completion.changed() => {
                    if changed.is_err() || *self.completion.borrow() {
                        self.state.am_interested = false;
                        let _ = self.stream.write_all(&Message::NotInterested.encode()).await;
                        return Ok(());
                    }
                }

                message = tokio::time::timeout(IDLE_TIMEOUT, Message::read_from(&mut self.stream)) => {
                    let message = message.map_err(|_| ProtocolError::IdleTimeout)??;
                    self.handle_message(message).await?;
                    self.maybe_request_block().await?;
                }
            }
        }
    }

    async fn handle_message(&mut self, message: Message) -> Result<(), ProtocolError> {
        match message {
            Message::KeepAlive => {}
            Message::Choke => {
                self.state.peer_choking = true;
                self.outstanding = None;
                self.swarm.peer_choked(self.addr).await;
            }
            Message::Unchoke => self.state.peer_choking = false,
            Message::Interested => self.state.peer_interested = true,
            Message::NotInterested => self.state.peer_interested = false,
            Message::Have(index) => self.swarm.peer_have(self.addr, index).await,
            Message::BitField(bits) => self.swarm.peer_bitfield(self.addr, bits).await,
            Message::Piece(index, begin, data) => {
                if self.outstanding == Some((index, begin, data.len() as u32)) {
                    self.outstanding = None;
                }
                self.swarm.deliver_block(self.addr, index, begin, data).await;
            }
            Message::Request(..) | Message::Cancel(..) => {
                // Serving the upload direction is out of scope for this core.
            }
            Message::Port(_) => {}
        }
        Ok(())
    }

    async fn maybe_request_block(&mut self) -> Result<(), ProtocolError> {
        if self.state.peer_choking || !self.state.am_interested || self.outstanding.is_some() {
            return Ok(());
        }

        let Some(block) = self.swarm.request_block(self.addr).await else {
            return Ok(());
        };

        self.outstanding = Some((block.index, block.begin, block.length));
        let request = Message::Request(block.index, block.begin, block.length);
        self.stream.write_all(&request.encode()).await?;
        Ok(())
    }
}

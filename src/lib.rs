//! Core of a minimal BitTorrent client: bencoding, metainfo loading, tracker
//! announces, the peer-wire protocol, and the piece/block swarm coordinator.
pub mod bencode;
pub mod peer;
pub mod piece;
pub mod swarm;
pub mod torrent;
pub mod tracker;

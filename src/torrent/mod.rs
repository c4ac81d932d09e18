//! Metainfo (`.torrent` file) parsing.
//!
//! This module loads a metainfo container into a [`file::TorrentFile`], and
//! maps its file list onto piece-relative byte ranges via
//! [`pieces::map_files_to_pieces`].
use thiserror::Error;

pub mod file;
pub mod info_hash;
pub mod pieces;

#[derive(Debug, Error)]
pub enum TorrentError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode decoding error: {0}")]
    Bencode(#[from] crate::bencode::BencodeDecodeError),

    #[error("bencode encoding error: {0}")]
    BencodeEncode(#[from] crate::bencode::BencodeEncodeError),

    #[error("invalid torrent file: {0}")]
    InvalidFormat(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("invalid pieces hash length (must be a multiple of 20)")]
    InvalidPiecesHashLength,

    #[error("date parse error")]
    DateParseError,
}

/// Result type for torrent operations.
pub type TorrentResult<T> = std::result::Result<T, TorrentError>;

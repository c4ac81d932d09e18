//! Bencoding codec: the self-describing encoding used for metainfo files and
//! tracker responses.
//!
//! A [`BencodeValue`] is the in-memory form of the four bencode variants.
//! Dictionaries are stored in a [`BTreeMap`] so iteration is always ascending
//! by raw key bytes — the same order [`encoder::encode`] requires — which
//! makes every encode canonical regardless of how the value was built or in
//! what order its source bytes listed the keys.
use std::collections::BTreeMap;
use thiserror::Error;

pub mod decoder;
pub mod encoder;

/// A decoded bencode value.
///
/// `String` is the bencode term of art for a length-prefixed byte string; it
/// is not required to be valid UTF-8 (torrent file paths, for instance,
/// sometimes aren't), so it is stored as raw bytes rather than `String`.
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum BencodeValue {
    String(Vec<u8>),
    Integer(i64),
    List(Vec<BencodeValue>),
    Dict(BTreeMap<Vec<u8>, BencodeValue>),
}

impl BencodeValue {
    pub fn as_string(&self) -> Option<&[u8]> {
        match self {
            BencodeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            BencodeValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[BencodeValue]> {
        match self {
            BencodeValue::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Vec<u8>, BencodeValue>> {
        match self {
            BencodeValue::Dict(d) => Some(d),
            _ => None,
        }
    }
}

/// Errors raised while decoding a bencode byte stream.
#[derive(Debug, Error)]
pub enum BencodeDecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid bencode format: {0}")]
    InvalidFormat(String),

    #[error("invalid integer literal")]
    InvalidInteger,

    #[error("invalid string length prefix")]
    InvalidStringLength,

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("dictionary keys must be byte-strings")]
    DictKeyNotString,

    #[error("duplicate dictionary key: {0:?}")]
    DuplicateKey(Vec<u8>),
}

/// Errors raised while encoding a [`BencodeValue`].
///
/// The variant set of [`BencodeValue`] is closed, so in practice the only way
/// this surfaces is the I/O failure path; the decode/encode error split is
/// kept symmetric with [`BencodeDecodeError`] regardless.
#[derive(Debug, Error)]
pub enum BencodeEncodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot encode value: {0}")]
    CannotEncodeType(&'static str),
}

pub type DecodeResult<T> = std::result::Result<T, BencodeDecodeError>;
pub type EncodeResult<T> = std::result::Result<T, BencodeEncodeError>;

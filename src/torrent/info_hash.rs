//! SHA-1 info-hash computation over a canonically re-encoded `info` dictionary.
use crate::bencode;
use crate::bencode::BencodeValue;
use crate::torrent::TorrentResult;
use sha1::Digest;
use sha1::Sha1;
use std::collections::BTreeMap;

/// Computes the 20-byte SHA-1 hash of `info_dict`'s canonical bencoding.
///
/// Because [`BencodeValue::Dict`] is backed by a [`BTreeMap`], re-encoding
/// always produces the same bytes regardless of how the dictionary was
/// originally ordered on the wire, so this hash is stable for a given set of
/// `info` keys and values.
#[tracing::instrument(skip(info_dict), level = "debug")]
pub fn calculate_info_hash(info_dict: &BTreeMap<Vec<u8>, BencodeValue>) -> TorrentResult<[u8; 20]> {
    let buffer = bencode::encoder::encode_to_vec(&BencodeValue::Dict(info_dict.clone()))?;

    let mut hasher = Sha1::new();
    hasher.update(&buffer);
    let digest = hasher.finalize();

    let mut info_hash = [0u8; 20];
    info_hash.copy_from_slice(&digest[..]);
    Ok(info_hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_stable_for_equivalent_dicts() {
        let mut a = BTreeMap::new();
        a.insert(b"name".to_vec(), BencodeValue::String(b"x".to_vec()));
        a.insert(b"length".to_vec(), BencodeValue::Integer(1));

        let mut b = BTreeMap::new();
        b.insert(b"length".to_vec(), BencodeValue::Integer(1));
        b.insert(b"name".to_vec(), BencodeValue::String(b"x".to_vec()));

        assert_eq!(calculate_info_hash(&a).unwrap(), calculate_info_hash(&b).unwrap());
    }

    #[test]
    fn hash_is_20_bytes() {
        let dict = BTreeMap::new();
        assert_eq!(calculate_info_hash(&dict).unwrap().len(), 20);
    }
}

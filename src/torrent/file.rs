//! Torrent descriptor: the parsed form of a `.torrent` file's top-level dictionary.
use crate::bencode::BencodeValue;
use crate::torrent::info_hash;

use super::{TorrentError, TorrentResult};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, PartialEq, Clone)]
pub struct TorrentFile {
    pub announce: String,
    /// One entry per announce-list tier; each tier is flattened to its first
    /// tracker, which is the minimal-implementation simplification this
    /// loader makes instead of trying every tracker in a tier.
    pub announce_list: Vec<String>,
    pub creation_date: Option<SystemTime>,
    pub comment: String,
    pub created_by: String,
    pub encoding: String,
    pub info: InfoDict,
    pub info_hash: [u8; 20],
    pub pieces_hash: Vec<[u8; 20]>,
}

#[derive(Debug, PartialEq, Clone)]
pub struct InfoDict {
    pub piece_length: i64,
    pub pieces: Vec<u8>,
    pub private: bool,
    pub name: String,
    pub length: Option<i64>,
    pub files: Vec<FileDict>,
    pub is_directory: bool,
}

#[derive(Debug, PartialEq, Clone)]
pub struct FileDict {
    pub length: i64,
    pub path: Vec<String>,
}

/// Splits the `pieces` byte string into its constituent 20-byte SHA-1 digests.
#[tracing::instrument(level = "trace")]
fn parse_pieces(pieces_bytes: &[u8]) -> TorrentResult<Vec<[u8; 20]>> {
    if pieces_bytes.len() % 20 != 0 {
        return Err(TorrentError::InvalidPiecesHashLength);
    }
    Ok(pieces_bytes.chunks_exact(20).map(|chunk| {
        let mut hash = [0u8; 20];
        hash.copy_from_slice(chunk);
        hash
    }).collect())
}

/// Flattens an `announce-list` value (a list of tracker tiers) down to one
/// tracker URL per tier, keeping only the first entry of each tier.
fn parse_announce_list(value: BencodeValue) -> TorrentResult<Vec<String>> {
    let tiers = match value {
        BencodeValue::List(tiers) => tiers,
        _ => return Err(TorrentError::InvalidFormat("announce-list not a list".to_string())),
    };

    let mut result = Vec::new();
    for tier in tiers {
        let trackers = match tier {
            BencodeValue::List(trackers) => trackers,
            _ => return Err(TorrentError::InvalidFormat("announce-list tier not a list".to_string())),
        };
        let first = match trackers.into_iter().next() {
            Some(BencodeValue::String(s)) => String::from_utf8(s).map_err(|e| {
                TorrentError::InvalidFormat(format!("invalid tracker URL (not UTF-8): {e}"))
            })?,
            Some(_) => return Err(TorrentError::InvalidFormat("tracker URL not a string".to_string())),
            None => continue,
        };
        result.push(first);
    }
    Ok(result)
}

fn parse_info_dict(value: BencodeValue) -> TorrentResult<InfoDict> {
    let dict = match value {
        BencodeValue::Dict(d) => d,
        _ => return Err(TorrentError::InvalidFormat("info is not a dictionary".to_string())),
    };

    let piece_length = match dict.get(b"piece length".as_slice()) {
        Some(BencodeValue::Integer(i)) => *i,
        _ => return Err(TorrentError::MissingField("piece length".to_string())),
    };

    let pieces_bytes = match dict.get(b"pieces".as_slice()) {
        Some(BencodeValue::String(s)) => s.clone(),
        _ => return Err(TorrentError::MissingField("pieces".to_string())),
    };

    let private = matches!(dict.get(b"private".as_slice()), Some(BencodeValue::Integer(1)));

    let name = match dict.get(b"name".as_slice()) {
        Some(BencodeValue::String(s)) => String::from_utf8(s.clone())
            .map_err(|e| TorrentError::InvalidFormat(format!("invalid name (not UTF-8): {e}")))?,
        _ => return Err(TorrentError::MissingField("name".to_string())),
    };

    let length = match dict.get(b"length".as_slice()) {
        Some(BencodeValue::Integer(i)) => Some(*i),
        _ => None,
    };

    let files = match dict.get(b"files".as_slice()) {
        Some(BencodeValue::List(list)) => {
            let mut files_vec = Vec::with_capacity(list.len());
            for file_val in list {
                let file_dict = match file_val {
                    BencodeValue::Dict(d) => d,
                    _ => return Err(TorrentError::InvalidFormat("file entry not a dict".to_string())),
                };

                let length = match file_dict.get(b"length".as_slice()) {
                    Some(BencodeValue::Integer(i)) => *i,
                    _ => return Err(TorrentError::MissingField("file length".to_string())),
                };

                let path = match file_dict.get(b"path".as_slice()) {
                    Some(BencodeValue::List(path_list)) => {
                        let mut path_vec = Vec::with_capacity(path_list.len());
                        for component in path_list {
                            match component {
                                BencodeValue::String(s) => {
                                    path_vec.push(String::from_utf8(s.clone()).map_err(|e| {
                                        TorrentError::InvalidFormat(format!(
                                            "invalid file path component (not UTF-8): {e}"
                                        ))
                                    })?);
                                }
                                _ => {
                                    return Err(TorrentError::InvalidFormat(
                                        "file path component not a string".to_string(),
                                    ));
                                }
                            }
                        }
                        path_vec
                    }
                    _ => return Err(TorrentError::MissingField("file path".to_string())),
                };

                files_vec.push(FileDict { length, path });
            }
            files_vec
        }
        _ => Vec::new(),
    };

    let is_directory = !files.is_empty();

    Ok(InfoDict {
        piece_length,
        pieces: pieces_bytes,
        private,
        name,
        length,
        files,
        is_directory,
    })
}

impl TorrentFile {
    /// Total content length: the single `length` for a one-file torrent, or
    /// the sum of each file's length for a directory torrent.
    pub fn total_length(&self) -> i64 {
        if self.info.is_directory {
            self.info.files.iter().map(|f| f.length).sum()
        } else {
            self.info.length.unwrap_or(0)
        }
    }

    pub fn num_pieces(&self) -> usize {
        self.pieces_hash.len()
    }

    /// Size of piece `index` in bytes — `piece_length` for every piece but the
    /// last, whose size is whatever remains of `total_length`.
    pub fn piece_size(&self, index: usize) -> i64 {
        if index >= self.num_pieces() {
            return 0;
        }
        if index < self.num_pieces() - 1 {
            self.info.piece_length
        } else {
            let full_pieces_length = (self.num_pieces() - 1) as i64 * self.info.piece_length;
            let last_piece_size = self.total_length() - full_pieces_length;
            if last_piece_size <= 0 {
                self.info.piece_length
            } else {
                last_piece_size
            }
        }
    }

    /// File paths (relative to `info.name`) that overlap piece `index`.
    ///
    /// For the exact byte ranges each file contributes within the piece, use
    /// [`crate::torrent::pieces::map_files_to_pieces`] instead.
    pub fn file_paths_for_piece(&self, index: usize) -> Vec<PathBuf> {
        if index >= self.num_pieces() {
            return Vec::new();
        }
        let piece_start = (index as i64) * self.info.piece_length;
        let piece_end = piece_start + self.piece_size(index);

        let mut result_paths = Vec::new();
        if !self.info.is_directory {
            result_paths.push(PathBuf::from(&self.info.name));
            return result_paths;
        }

        let mut current_data_position: i64 = 0;
        for file_info in &self.info.files {
            let file_start = current_data_position;
            let file_end = file_start + file_info.length;
            if file_end > piece_start && file_start < piece_end {
                let mut full_path = PathBuf::from(&self.info.name);
                for component in &file_info.path {
                    full_path = full_path.join(component);
                }
                result_paths.push(full_path);
            }
            current_data_position = file_end;
        }
        result_paths
    }

    #[tracing::instrument(skip(data), level = "debug")]
    pub fn parse(data: BencodeValue) -> TorrentResult<TorrentFile> {
        let mut dict = match data {
            BencodeValue::Dict(d) => d,
            _ => return Err(TorrentError::InvalidFormat("root is not a dictionary".to_string())),
        };

        let announce = match dict
            .remove(b"announce".as_slice())
            .ok_or_else(|| TorrentError::MissingField("announce".to_string()))?
        {
            BencodeValue::String(s) => String::from_utf8(s).map_err(|e| {
                TorrentError::InvalidFormat(format!("invalid announce URL (not UTF-8): {e}"))
            })?,
            _ => return Err(TorrentError::InvalidFormat("announce not a string".to_string())),
        };

        let info_dict_value = dict
            .remove(b"info".as_slice())
            .ok_or_else(|| TorrentError::MissingField("info".to_string()))?;

        let info_dict_map = match &info_dict_value {
            BencodeValue::Dict(d) => d.clone(),
            _ => return Err(TorrentError::InvalidFormat("info is not a dict".to_string())),
        };

        let info = parse_info_dict(info_dict_value)?;

        let announce_list = match dict.remove(b"announce-list".as_slice()) {
            Some(value) => parse_announce_list(value)?,
            None => Vec::new(),
        };

        let creation_date = match dict.remove(b"creation date".as_slice()) {
            Some(BencodeValue::Integer(timestamp)) => {
                let secs: u64 = timestamp.try_into().map_err(|_| TorrentError::DateParseError)?;
                Some(UNIX_EPOCH + std::time::Duration::from_secs(secs))
            }
            Some(_) => {
                return Err(TorrentError::InvalidFormat("creation date not an integer".to_string()));
            }
            None => None,
        };

        let comment = match dict.remove(b"comment".as_slice()) {
            Some(BencodeValue::String(s)) => String::from_utf8(s).unwrap_or_default(),
            _ => String::new(),
        };
        let created_by = match dict.remove(b"created by".as_slice()) {
            Some(BencodeValue::String(s)) => String::from_utf8(s).unwrap_or_default(),
            _ => String::new(),
        };
        let encoding = match dict.remove(b"encoding".as_slice()) {
            Some(BencodeValue::String(s)) => String::from_utf8(s).unwrap_or_default(),
            _ => String::new(),
        };

        let info_hash = info_hash::calculate_info_hash(&info_dict_map)?;
        let pieces_hash = parse_pieces(&info.pieces)?;

        Ok(TorrentFile {
            announce,
            announce_list,
            creation_date,
            comment,
            created_by,
            encoding,
            info,
            info_hash,
            pieces_hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decoder::decode;

    fn single_file_torrent() -> BencodeValue {
        decode(
            b"d8:announce16:http://tracker/4:infod6:lengthi20e4:name5:a.txt12:piece lengthi10e6:pieces40:\
aaaaaaaaaaaaaaaaaaaabbbbbbbbbbbbbbbbbbbbee"
                .as_slice(),
        )
        .unwrap()
    }

    #[test]
    fn parses_single_file_torrent() {
        let torrent = TorrentFile::parse(single_file_torrent()).unwrap();
        assert_eq!(torrent.announce, "http://tracker/");
        assert_eq!(torrent.total_length(), 20);
        assert_eq!(torrent.num_pieces(), 2);
        assert!(!torrent.info.is_directory);
    }

    #[test]
    fn piece_size_accounts_for_short_final_piece() {
        let torrent = TorrentFile::parse(single_file_torrent()).unwrap();
        assert_eq!(torrent.piece_size(0), 10);
        assert_eq!(torrent.piece_size(1), 10);
    }

    #[test]
    fn rejects_malformed_pieces_length() {
        let dict = match single_file_torrent() {
            BencodeValue::Dict(d) => d,
            _ => unreachable!(),
        };
        let mut info = match dict.get(b"info".as_slice()).unwrap().clone() {
            BencodeValue::Dict(d) => d,
            _ => unreachable!(),
        };
        info.insert(b"pieces".to_vec(), BencodeValue::String(vec![0u8; 19]));
        let mut root = dict.clone();
        root.insert(b"info".to_vec(), BencodeValue::Dict(info));

        let err = TorrentFile::parse(BencodeValue::Dict(root)).unwrap_err();
        assert!(matches!(err, TorrentError::InvalidPiecesHashLength));
    }
}

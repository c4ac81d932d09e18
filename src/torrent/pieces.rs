//! Maps a torrent's file list onto piece-relative byte ranges.
//!
//! This is a pure function with no I/O: it is the piece of bookkeeping an
//! on-disk writer needs to know which bytes of an incoming piece belong to
//! which file, without this crate taking on the writer itself.
use crate::torrent::file::FileDict;

/// One contiguous run of a file's bytes that lives inside a single piece.
///
/// `length` is always the number of bytes of the file present at this slice
/// — never a cumulative or end offset. A file spanning three pieces
/// therefore has three `PieceSlice`s whose `length`s sum to the file's total
/// length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PieceSlice {
    pub piece_index: usize,
    pub offset: i64,
    pub length: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedFile {
    pub path: Vec<String>,
    pub length: i64,
    pub slices: Vec<PieceSlice>,
}

/// Lays `files` out contiguously, in order, and records which piece-relative
/// byte ranges each one occupies.
///
/// `piece_length` must be positive; this is guaranteed by a valid metainfo
/// `info` dictionary (§4.2) and is not re-validated here.
pub fn map_files_to_pieces(files: &[FileDict], piece_length: i64) -> Vec<MappedFile> {
    let mut mapped = Vec::with_capacity(files.len());
    let mut global_offset: i64 = 0;

    for file in files {
        let mut slices = Vec::new();
        let mut remaining = file.length;
        let mut position = global_offset;

        while remaining > 0 {
            let piece_index = (position / piece_length) as usize;
            let offset_in_piece = position % piece_length;
            let space_left_in_piece = piece_length - offset_in_piece;
            let slice_length = remaining.min(space_left_in_piece);

            slices.push(PieceSlice {
                piece_index,
                offset: offset_in_piece,
                length: slice_length,
            });

            position += slice_length;
            remaining -= slice_length;
        }

        mapped.push(MappedFile {
            path: file.path.clone(),
            length: file.length,
            slices,
        });
        global_offset += file.length;
    }

    mapped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(length: i64, name: &str) -> FileDict {
        FileDict { length, path: vec![name.to_string()] }
    }

    #[test]
    fn single_file_within_one_piece() {
        let mapped = map_files_to_pieces(&[file(5, "a")], 16);
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].slices, vec![PieceSlice { piece_index: 0, offset: 0, length: 5 }]);
    }

    #[test]
    fn file_spanning_multiple_pieces_has_lengths_not_end_offsets() {
        let mapped = map_files_to_pieces(&[file(25, "a")], 10);
        assert_eq!(
            mapped[0].slices,
            vec![
                PieceSlice { piece_index: 0, offset: 0, length: 10 },
                PieceSlice { piece_index: 1, offset: 0, length: 10 },
                PieceSlice { piece_index: 2, offset: 0, length: 5 },
            ]
        );
        let total: i64 = mapped[0].slices.iter().map(|s| s.length).sum();
        assert_eq!(total, 25);
    }

    #[test]
    fn second_file_starts_mid_piece_after_first() {
        let mapped = map_files_to_pieces(&[file(7, "a"), file(8, "b")], 10);
        assert_eq!(
            mapped[1].slices,
            vec![
                PieceSlice { piece_index: 0, offset: 7, length: 3 },
                PieceSlice { piece_index: 1, offset: 0, length: 5 },
            ]
        );
    }

    #[test]
    fn empty_file_produces_no_slices() {
        let mapped = map_files_to_pieces(&[file(0, "empty")], 16);
        assert!(mapped[0].slices.is_empty());
    }
}

//! Resume planning.
//!
//! Before re-uploading, the client hashes each local chunk and compares
//! it against the server's staged copy. A chunk is needed when the
//! server does not have it, or has it with a different hash (the local
//! file may have been edited between runs). The result overrides
//! whatever the local record claims about uploaded chunks, so a stale
//! chunk can never survive into the finalized file.

use std::fs::File;
use std::io;

use sha2::{Digest, Sha256};

use ctrans::api::upload::ChunkStatusResponse;
use ctrans::chunking::chunk_span;

use crate::fileio::read_exact_at;

/// Computes the set of chunk indices that must be (re-)uploaded.
///
/// Blocking: hashes up to the whole file. Call from a blocking context.
pub fn plan_resume(file: &File, report: &ChunkStatusResponse) -> io::Result<Vec<u32>> {
    let mut needed = Vec::new();

    for index in 0..report.total_chunks {
        let (start, len) = chunk_span(index, report.total_size);
        let mut buf = vec![0u8; len as usize];
        read_exact_at(file, &mut buf, start)?;

        let local_hash = hex::encode(Sha256::digest(&buf));

        let matches_server = report
            .chunks
            .get(&index)
            .is_some_and(|chunk| chunk.exists && chunk.hash.as_deref() == Some(&local_hash));

        if !matches_server {
            needed.push(index);
        }
    }

    Ok(needed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::io::Write;

    use ctrans::api::upload::ChunkStatus;
    use ctrans::chunking::{total_chunks, CHUNK_SIZE};

    fn report_for(data: &[u8], present: &[u32]) -> ChunkStatusResponse {
        let total_size = data.len() as u64;
        let n = total_chunks(total_size);

        let mut chunks = BTreeMap::new();
        for index in 0..n {
            let (start, len) = chunk_span(index, total_size);
            let slice = &data[start as usize..(start + len) as usize];

            if present.contains(&index) {
                chunks.insert(
                    index,
                    ChunkStatus {
                        exists: true,
                        size: len,
                        hash: Some(hex::encode(Sha256::digest(slice))),
                    },
                );
            } else {
                chunks.insert(index, ChunkStatus::default());
            }
        }

        ChunkStatusResponse {
            file_id: "0123456789abcdef".to_string(),
            file_name: "a.bin".to_string(),
            total_size,
            total_chunks: n,
            chunk_size: CHUNK_SIZE,
            chunks,
        }
    }

    fn write_temp(data: &[u8]) -> (tempfile::NamedTempFile, File) {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(data).unwrap();
        let file = tmp.reopen().unwrap();
        (tmp, file)
    }

    #[test]
    fn only_missing_chunks_are_needed() {
        // 2.5 chunks worth of data
        let data = vec![9u8; (2 * CHUNK_SIZE + CHUNK_SIZE / 2) as usize];
        let (_tmp, file) = write_temp(&data);

        let report = report_for(&data, &[0, 2]);
        let needed = plan_resume(&file, &report).unwrap();
        assert_eq!(needed, vec![1]);
    }

    #[test]
    fn nothing_needed_when_all_match() {
        let data = vec![1u8; (CHUNK_SIZE + 17) as usize];
        let (_tmp, file) = write_temp(&data);

        let report = report_for(&data, &[0, 1]);
        assert!(plan_resume(&file, &report).unwrap().is_empty());
    }

    #[test]
    fn edited_chunk_is_re_sent() {
        let mut data = vec![5u8; (CHUNK_SIZE + 100) as usize];
        let (_tmp, file) = write_temp(&data);

        // report reflects the original content, then the first byte changes
        let report = report_for(&data, &[0, 1]);
        data[0] ^= 0xff;
        std::fs::write(_tmp.path(), &data).unwrap();

        let needed = plan_resume(&file, &report).unwrap();
        assert_eq!(needed, vec![0]);
    }

    #[test]
    fn empty_file_needs_nothing() {
        let (_tmp, file) = write_temp(&[]);
        let report = report_for(&[], &[]);
        assert!(plan_resume(&file, &report).unwrap().is_empty());
    }
}

//! Synchronous BLAKE3 digesting. Runs inside `spawn_blocking`; never called
//! directly from async code.

use anyhow::Result;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

const FULL_CHUNK: usize = 1024 * 1024;
const PARTIAL_CHUNK: usize = 4 * 1024 * 1024;

/// Hash the whole file, 1 MiB at a time.
pub fn compute_full_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = vec![0u8; FULL_CHUNK];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_hex().to_string())
}

/// Hash the first 4 MiB plus the last 4 MiB (whole file if smaller).
pub fn compute_partial_hash(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();

    let mut start_buf = vec![0u8; PARTIAL_CHUNK];
    let mut read_total = 0usize;
    while read_total < start_buf.len() {
        let n = file.read(&mut start_buf[read_total..])?;
        if n == 0 {
            break;
        }
        read_total += n;
    }
    hasher.update(&start_buf[..read_total]);

    let size = file.seek(SeekFrom::End(0))?;
    if size as usize > read_total {
        let seek_pos = (read_total as u64).max(size.saturating_sub(PARTIAL_CHUNK as u64));
        file.seek(SeekFrom::Start(seek_pos))?;
        let mut end_buf = vec![0u8; PARTIAL_CHUNK];
        let mut end_total = 0usize;
        while end_total < end_buf.len() {
            let n = file.read(&mut end_buf[end_total..])?;
            if n == 0 {
                break;
            }
            end_total += n;
        }
        hasher.update(&end_buf[..end_total]);
    }

    Ok(hasher.finalize().to_hex().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_and_partial_agree_on_small_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.bin");
        std::fs::write(&path, b"hello world").unwrap();
        assert_eq!(
            compute_full_hash(&path).unwrap(),
            compute_partial_hash(&path).unwrap()
        );
    }

    #[test]
    fn partial_hash_differs_for_large_file_with_distinct_middle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("large.bin");
        let mut data = vec![0u8; 10 * 1024 * 1024];
        for (i, b) in data.iter_mut().enumerate().skip(5 * 1024 * 1024).take(1024) {
            *b = (i % 256) as u8;
        }
        std::fs::write(&path, &data).unwrap();

        let full = compute_full_hash(&path).unwrap();
        let partial = compute_partial_hash(&path).unwrap();
        assert_ne!(full, partial);
    }

    #[test]
    fn full_hash_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.bin");
        std::fs::write(&path, vec![42u8; 3 * 1024 * 1024 + 17]).unwrap();
        assert_eq!(compute_full_hash(&path).unwrap(), compute_full_hash(&path).unwrap());
    }
}

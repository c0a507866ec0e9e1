//! Range Streamer: pure path-safety and byte-range logic behind the
//! `GET /api/remote/assets/file` handler. The HTTP binding
//! (response bodies, status codes) lives in `mvault-cli`'s routes; this
//! module owns the two things that must never be wrong: traversal
//! rejection and range-math.

use std::path::{Component, Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RangeStreamError {
    /// The requested relpath escapes the side root (`..`, leading `/`, a
    /// backslash, or resolves outside the root after joining).
    InvalidPath,
    /// `start >= size`; answered with a 416 and
    /// `Content-Range: bytes */size`.
    RangeNotSatisfiable { size: u64 },
}

/// A validated, byte-exact response plan for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamPlan {
    /// No `Range` header: whole file, `Accept-Ranges: bytes`.
    Whole { size: u64 },
    /// `Range: bytes=start-[end]`: partial content, inclusive bounds.
    Partial { start: u64, end: u64, size: u64 },
}

impl StreamPlan {
    pub fn content_length(&self) -> u64 {
        match self {
            StreamPlan::Whole { size } => *size,
            StreamPlan::Partial { start, end, .. } => end - start + 1,
        }
    }

    pub fn content_range_header(&self) -> Option<String> {
        match self {
            StreamPlan::Whole { .. } => None,
            StreamPlan::Partial { start, end, size } => Some(format!("bytes {start}-{end}/{size}")),
        }
    }
}

/// Rejects any relpath containing `..`, a leading `/`, or a backslash, then
/// resolves it against `root` and checks the result is still within
/// `root`.
pub fn resolve_safe_path(root: &Path, relpath: &str) -> Result<PathBuf, RangeStreamError> {
    if relpath.contains("..") || relpath.starts_with('/') || relpath.contains('\\') {
        return Err(RangeStreamError::InvalidPath);
    }
    let mut joined = root.to_path_buf();
    for component in Path::new(relpath).components() {
        match component {
            Component::Normal(part) => joined.push(part),
            Component::CurDir => {}
            _ => return Err(RangeStreamError::InvalidPath),
        }
    }
    // Lexical containment check; avoids requiring the file to exist yet.
    let root_components: Vec<_> = root.components().collect();
    let joined_components: Vec<_> = joined.components().collect();
    if joined_components.len() < root_components.len() || joined_components[..root_components.len()] != root_components[..] {
        return Err(RangeStreamError::InvalidPath);
    }
    Ok(joined)
}

/// Parses a `Range: bytes=start-[end]` header value against a known file
/// `size`, returning the byte-exact plan.
pub fn parse_range(header: Option<&str>, size: u64) -> Result<StreamPlan, RangeStreamError> {
    let header = match header {
        Some(h) => h,
        None => return Ok(StreamPlan::Whole { size }),
    };
    let spec = match header.strip_prefix("bytes=") {
        Some(s) => s,
        None => return Ok(StreamPlan::Whole { size }),
    };
    let (start_str, end_str) = match spec.split_once('-') {
        Some(parts) => parts,
        None => return Ok(StreamPlan::Whole { size }),
    };

    let (start, end) = if start_str.is_empty() {
        // suffix range: "bytes=-N" means the last N bytes
        let suffix_len: u64 = end_str.parse().map_err(|_| RangeStreamError::InvalidPath)?;
        if suffix_len == 0 || size == 0 {
            return Err(RangeStreamError::RangeNotSatisfiable { size });
        }
        let start = size.saturating_sub(suffix_len);
        (start, size - 1)
    } else {
        let start: u64 = start_str.parse().map_err(|_| RangeStreamError::InvalidPath)?;
        let end = if end_str.is_empty() {
            size.saturating_sub(1)
        } else {
            end_str.parse().map_err(|_| RangeStreamError::InvalidPath)?
        };
        (start, end)
    };

    if start >= size {
        return Err(RangeStreamError::RangeNotSatisfiable { size });
    }
    let end = end.min(size.saturating_sub(1)).max(start);
    Ok(StreamPlan::Partial { start, end, size })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal_and_leading_slash() {
        let root = Path::new("/vault/local");
        assert_eq!(resolve_safe_path(root, "../etc/passwd"), Err(RangeStreamError::InvalidPath));
        assert_eq!(resolve_safe_path(root, "/etc/passwd"), Err(RangeStreamError::InvalidPath));
        assert_eq!(resolve_safe_path(root, "a\\b"), Err(RangeStreamError::InvalidPath));
    }

    #[test]
    fn resolves_nested_relpath_within_root() {
        let root = Path::new("/vault/local");
        let resolved = resolve_safe_path(root, "a/b/c.bin").unwrap();
        assert_eq!(resolved, PathBuf::from("/vault/local/a/b/c.bin"));
    }

    #[test]
    fn no_range_header_yields_whole_file() {
        assert_eq!(parse_range(None, 1000).unwrap(), StreamPlan::Whole { size: 1000 });
    }

    #[test]
    fn range_with_start_and_end() {
        let plan = parse_range(Some("bytes=10-19"), 1000).unwrap();
        assert_eq!(plan, StreamPlan::Partial { start: 10, end: 19, size: 1000 });
        assert_eq!(plan.content_length(), 10);
        assert_eq!(plan.content_range_header().unwrap(), "bytes 10-19/1000");
    }

    #[test]
    fn open_ended_range_goes_to_eof() {
        let plan = parse_range(Some("bytes=990-"), 1000).unwrap();
        assert_eq!(plan, StreamPlan::Partial { start: 990, end: 999, size: 1000 });
    }

    #[test]
    fn suffix_range_is_last_n_bytes() {
        let plan = parse_range(Some("bytes=-100"), 1000).unwrap();
        assert_eq!(plan, StreamPlan::Partial { start: 900, end: 999, size: 1000 });
    }

    #[test]
    fn start_at_or_past_size_is_not_satisfiable() {
        assert_eq!(parse_range(Some("bytes=1000-"), 1000), Err(RangeStreamError::RangeNotSatisfiable { size: 1000 }));
        assert_eq!(parse_range(Some("bytes=5000-6000"), 1000), Err(RangeStreamError::RangeNotSatisfiable { size: 1000 }));
    }
}

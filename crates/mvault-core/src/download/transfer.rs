//! Blocking curl transfer for one download attempt, grounded in the
//! original service's single-transfer loop and extended with byte-range
//! resume, Content-Disposition capture, and a cooperative abort token.

use crate::url_model::parse_content_disposition_filename;
use std::fs::OpenOptions;
use std::io::{Seek, SeekFrom, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub struct TransferOutcome {
    pub bytes_written: u64,
    pub total_bytes: Option<u64>,
    pub filename_from_disposition: Option<String>,
    /// The server ignored our Range request and returned 200 with the full
    /// body; the caller must have truncated and reset.
    pub range_ignored: bool,
}

#[derive(Debug)]
pub enum TransferError {
    Curl(curl::Error),
    HttpStatus(u32),
    Io(std::io::Error),
    Aborted,
}

impl std::fmt::Display for TransferError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferError::Curl(e) => write!(f, "{e}"),
            TransferError::HttpStatus(c) => write!(f, "HTTP {c}"),
            TransferError::Io(e) => write!(f, "{e}"),
            TransferError::Aborted => write!(f, "aborted"),
        }
    }
}

impl std::error::Error for TransferError {}

struct HeaderState {
    status_200_with_range_request: bool,
    content_disposition: Option<String>,
    total_bytes: Option<u64>,
}

/// Performs one GET attempt, resuming from `offset` via `Range` when
/// `offset > 0`. Writes sequentially into `temp_path` starting at `offset`
/// (or at 0 if the server ignores the Range request). Blocking; run inside
/// `spawn_blocking`.
#[allow(clippy::too_many_arguments)]
pub fn run_transfer(
    url: &str,
    extra_headers: &[(String, String)],
    offset: u64,
    temp_path: &Path,
    abort: Arc<AtomicBool>,
    progress: Arc<AtomicU64>,
    progress_tx: tokio::sync::mpsc::Sender<u64>,
    connect_timeout: Duration,
    stall_timeout: Duration,
) -> Result<TransferOutcome, TransferError> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(temp_path)
        .map_err(TransferError::Io)?;
    let file = Arc::new(Mutex::new(file));
    {
        let mut f = file.lock().unwrap();
        f.seek(SeekFrom::Start(offset)).map_err(TransferError::Io)?;
    }

    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(TransferError::Curl)?;
    easy.follow_location(true).map_err(TransferError::Curl)?;
    easy.max_redirections(10).map_err(TransferError::Curl)?;
    easy.connect_timeout(connect_timeout).map_err(TransferError::Curl)?;
    easy.low_speed_limit(1).map_err(TransferError::Curl)?;
    easy.low_speed_time(stall_timeout).map_err(TransferError::Curl)?;

    let mut header_list = curl::easy::List::new();
    header_list
        .append(&format!("User-Agent: mvault/{}", env!("CARGO_PKG_VERSION")))
        .map_err(TransferError::Curl)?;
    for (k, v) in extra_headers {
        header_list.append(&format!("{k}: {v}")).map_err(TransferError::Curl)?;
    }
    let sent_range = offset > 0;
    if sent_range {
        header_list.append(&format!("Range: bytes={offset}-")).map_err(TransferError::Curl)?;
    }
    easy.http_headers(header_list).map_err(TransferError::Curl)?;

    let state = Arc::new(Mutex::new(HeaderState {
        status_200_with_range_request: false,
        content_disposition: None,
        total_bytes: None,
    }));

    let write_offset = Arc::new(AtomicU64::new(offset));
    let last_persist = Arc::new(Mutex::new(std::time::Instant::now()));

    {
        let mut transfer = easy.transfer();

        let state_hdr = Arc::clone(&state);
        transfer
            .header_function(move |data| {
                let line = String::from_utf8_lossy(data);
                let trimmed = line.trim();
                if let Some(rest) = trimmed.strip_prefix("HTTP/") {
                    if let Some(code_str) = rest.split_whitespace().nth(1) {
                        if let Ok(code) = code_str.parse::<u32>() {
                            let mut st = state_hdr.lock().unwrap();
                            st.status_200_with_range_request = sent_range && code == 200;
                        }
                    }
                } else if let Some((name, value)) = trimmed.split_once(':') {
                    let name = name.trim().to_ascii_lowercase();
                    let value = value.trim();
                    if name == "content-disposition" {
                        state_hdr.lock().unwrap().content_disposition = Some(value.to_string());
                    } else if name == "content-length" {
                        if let Ok(len) = value.parse::<u64>() {
                            state_hdr.lock().unwrap().total_bytes = Some(len);
                        }
                    }
                }
                true
            })
            .map_err(TransferError::Curl)?;

        let file_body = Arc::clone(&file);
        let abort_body = Arc::clone(&abort);
        let state_body = Arc::clone(&state);
        let write_offset_body = Arc::clone(&write_offset);
        let progress_body = Arc::clone(&progress);
        let truncated_once = Arc::new(AtomicBool::new(false));

        transfer
            .write_function(move |data| {
                if abort_body.load(Ordering::Relaxed) {
                    return Ok(0);
                }

                let range_ignored = state_body.lock().unwrap().status_200_with_range_request;
                if range_ignored && !truncated_once.swap(true, Ordering::SeqCst) {
                    let mut f = file_body.lock().unwrap();
                    let _ = f.set_len(0);
                    let _ = f.seek(SeekFrom::Start(0));
                    write_offset_body.store(0, Ordering::SeqCst);
                    progress_body.store(0, Ordering::SeqCst);
                }

                let mut f = file_body.lock().unwrap();
                match f.write_all(data) {
                    Ok(()) => {
                        write_offset_body.fetch_add(data.len() as u64, Ordering::SeqCst);
                        let total = progress_body.fetch_add(data.len() as u64, Ordering::SeqCst) + data.len() as u64;
                        let _ = total;
                        Ok(data.len())
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "download write failed");
                        Ok(0)
                    }
                }
            })
            .map_err(TransferError::Curl)?;

        transfer.perform().map_err(TransferError::Curl)?;
    }

    if abort.load(Ordering::Relaxed) {
        return Err(TransferError::Aborted);
    }

    let code = easy.response_code().map_err(TransferError::Curl)?;
    if code >= 400 {
        return Err(TransferError::HttpStatus(code));
    }

    let st = state.lock().unwrap();
    let filename_from_disposition = st
        .content_disposition
        .as_deref()
        .and_then(parse_content_disposition_filename);

    // persist a final progress tick regardless of throttle state
    let _ = progress_tx.try_send(progress.load(Ordering::SeqCst));
    let _ = last_persist;

    Ok(TransferOutcome {
        bytes_written: write_offset.load(Ordering::SeqCst),
        total_bytes: st.total_bytes,
        filename_from_disposition,
        range_ignored: st.status_200_with_range_request,
    })
}

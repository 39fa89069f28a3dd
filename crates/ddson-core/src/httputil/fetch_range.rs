//! Ranged GET against the origin, buffered into memory.
//!
//! The agent fetches one chunk per call; chunks are bounded by the
//! coordinator's plan size, so an in-memory buffer is acceptable. The
//! `progress` counter is bumped as bytes arrive so an async observer can
//! report transfer progress while this blocks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::TaskError;

use super::netrc;

/// GET `bytes=offset..offset+size-1` from `url`. Fails fast on any HTTP
/// status other than 200/206 and on a byte-count mismatch.
/// Blocking; call from `spawn_blocking` in async code.
pub fn fetch_range(
    url: &str,
    offset: u64,
    size: u64,
    progress: Arc<AtomicU64>,
) -> Result<Vec<u8>, TaskError> {
    let mut buf: Vec<u8> = Vec::with_capacity(size.min(64 * 1024 * 1024) as usize);

    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(curl_err)?;
    easy.follow_location(true).map_err(curl_err)?;
    easy.max_redirections(10).map_err(curl_err)?;
    easy.connect_timeout(Duration::from_secs(30)).map_err(curl_err)?;
    // Abort when throughput drops below 1 KiB/s for 60 s rather than using a
    // hard wall-clock timeout that would kill large chunks on slow links.
    easy.low_speed_limit(1024).map_err(curl_err)?;
    easy.low_speed_time(Duration::from_secs(60)).map_err(curl_err)?;

    if size > 0 {
        let range = format!("{}-{}", offset, offset + size - 1);
        easy.range(&range).map_err(curl_err)?;
    }

    if let Some(creds) = netrc::lookup_credentials(url) {
        tracing::debug!(url, "using .netrc credentials for ranged GET");
        easy.username(&creds.login).map_err(curl_err)?;
        easy.password(&creds.password).map_err(curl_err)?;
    }

    {
        let mut transfer = easy.transfer();
        transfer
            .write_function(|data| {
                buf.extend_from_slice(data);
                progress.fetch_add(data.len() as u64, Ordering::Relaxed);
                Ok(data.len())
            })
            .map_err(curl_err)?;
        transfer.perform().map_err(curl_err)?;
    }

    let status = easy.response_code().map_err(curl_err)? as u32;
    if status != 200 && status != 206 {
        return Err(TaskError::OriginHttp { status });
    }

    if buf.len() as u64 != size {
        return Err(TaskError::ShortRead {
            got: buf.len() as u64,
            want: size,
        });
    }

    Ok(buf)
}

fn curl_err(e: curl::Error) -> TaskError {
    TaskError::Transport(e.to_string())
}

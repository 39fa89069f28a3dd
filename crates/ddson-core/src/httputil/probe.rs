//! HEAD probe: confirm ranged-download support and learn the total size.

use std::str;
use std::time::Duration;

use crate::error::TaskError;

use super::netrc;

/// Performs a HEAD request against `url`. Requires `Accept-Ranges: bytes`
/// and a parseable `Content-Length`; anything else is `RangeNotSupported`.
/// Follows redirects and keeps only the final response's headers.
/// Blocking; call from `spawn_blocking` in async code.
pub fn probe_origin(url: &str) -> Result<u64, TaskError> {
    let mut headers: Vec<String> = Vec::new();

    let mut easy = curl::easy::Easy::new();
    easy.url(url).map_err(curl_err)?;
    easy.nobody(true).map_err(curl_err)?;
    easy.follow_location(true).map_err(curl_err)?;
    easy.max_redirections(10).map_err(curl_err)?;
    easy.connect_timeout(Duration::from_secs(15)).map_err(curl_err)?;
    easy.timeout(Duration::from_secs(30)).map_err(curl_err)?;

    if let Some(creds) = netrc::lookup_credentials(url) {
        tracing::debug!(url, "using .netrc credentials for probe");
        easy.username(&creds.login).map_err(curl_err)?;
        easy.password(&creds.password).map_err(curl_err)?;
    }

    {
        let mut transfer = easy.transfer();
        transfer
            .header_function(|data| {
                if let Ok(s) = str::from_utf8(data) {
                    let line = s.trim_end();
                    // curl emits one header block per hop when following
                    // redirects; keep only the final block.
                    if line.starts_with("HTTP/") {
                        headers.clear();
                    }
                    headers.push(line.to_string());
                }
                true
            })
            .map_err(curl_err)?;
        transfer.perform().map_err(curl_err)?;
    }

    let status = easy.response_code().map_err(curl_err)? as u32;
    if !(200..300).contains(&status) {
        return Err(TaskError::OriginHttp { status });
    }

    parse_probe_headers(&headers)
}

fn curl_err(e: curl::Error) -> TaskError {
    TaskError::Transport(e.to_string())
}

fn parse_probe_headers(lines: &[String]) -> Result<u64, TaskError> {
    let mut content_length = None;
    let mut accept_ranges = false;

    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            let name = name.trim();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.parse::<u64>().ok();
            } else if name.eq_ignore_ascii_case("accept-ranges") {
                accept_ranges = value.eq_ignore_ascii_case("bytes");
            }
        }
    }

    match (accept_ranges, content_length) {
        (true, Some(total)) => Ok(total),
        _ => Err(TaskError::RangeNotSupported),
    }
}

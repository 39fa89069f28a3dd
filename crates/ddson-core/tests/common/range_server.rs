//! Minimal HTTP/1.1 origin for integration tests: HEAD plus ranged GET.
//!
//! Serves one static body from a background thread and counts GET requests
//! so tests can prove whether agents touched the origin at all.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

#[derive(Debug, Clone, Copy)]
pub struct OriginOptions {
    /// If false, responses omit `Accept-Ranges: bytes`.
    pub advertise_ranges: bool,
}

impl Default for OriginOptions {
    fn default() -> Self {
        Self {
            advertise_ranges: true,
        }
    }
}

pub struct Origin {
    pub url: String,
    gets: Arc<AtomicUsize>,
}

impl Origin {
    /// Number of GET requests the origin has answered so far.
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }
}

/// Start an origin serving `body`. Runs until the process exits.
pub fn start(body: Vec<u8>) -> Origin {
    start_with_options(body, OriginOptions::default())
}

pub fn start_with_options(body: Vec<u8>, opts: OriginOptions) -> Origin {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind origin");
    let port = listener.local_addr().unwrap().port();
    let body = Arc::new(body);
    let gets = Arc::new(AtomicUsize::new(0));
    let gets_server = Arc::clone(&gets);
    thread::spawn(move || {
        for stream in listener.incoming().flatten() {
            let body = Arc::clone(&body);
            let gets = Arc::clone(&gets_server);
            thread::spawn(move || handle(stream, &body, opts, &gets));
        }
    });
    Origin {
        url: format!("http://127.0.0.1:{}/artifact.bin", port),
        gets,
    }
}

fn handle(
    mut stream: std::net::TcpStream,
    body: &[u8],
    opts: OriginOptions,
    gets: &AtomicUsize,
) {
    let _ = stream.set_read_timeout(Some(std::time::Duration::from_secs(2)));
    let _ = stream.set_write_timeout(Some(std::time::Duration::from_secs(2)));
    let mut buf = [0u8; 8192];
    let n = match stream.read(&mut buf) {
        Ok(0) | Err(_) => return,
        Ok(n) => n,
    };
    let Ok(request) = std::str::from_utf8(&buf[..n]) else {
        return;
    };
    let (method, range) = parse_request(request);
    let total = body.len() as u64;
    let accept_ranges = if opts.advertise_ranges {
        "Accept-Ranges: bytes\r\n"
    } else {
        ""
    };

    if method.eq_ignore_ascii_case("HEAD") {
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {total}\r\n{accept_ranges}Connection: close\r\n\r\n"
        );
        let _ = stream.write_all(response.as_bytes());
        return;
    }

    if method.eq_ignore_ascii_case("GET") {
        gets.fetch_add(1, Ordering::SeqCst);
        let (status, content_range, slice) = match range {
            Some((start, end_incl)) if opts.advertise_ranges => {
                let end_incl = end_incl.min(total.saturating_sub(1));
                if start > end_incl || start >= total {
                    (
                        "416 Range Not Satisfiable".to_string(),
                        format!("Content-Range: bytes */{total}\r\n"),
                        &body[0..0],
                    )
                } else {
                    let s = start as usize;
                    let e = (end_incl + 1) as usize;
                    (
                        "206 Partial Content".to_string(),
                        format!("Content-Range: bytes {start}-{end_incl}/{total}\r\n"),
                        &body[s..e],
                    )
                }
            }
            _ => ("200 OK".to_string(), String::new(), body),
        };
        let response = format!(
            "HTTP/1.1 {status}\r\nContent-Length: {}\r\n{content_range}{accept_ranges}Connection: close\r\n\r\n",
            slice.len()
        );
        let _ = stream.write_all(response.as_bytes());
        let _ = stream.write_all(slice);
        return;
    }

    let _ = stream.write_all(b"HTTP/1.1 405 Method Not Allowed\r\n\r\n");
}

/// Returns (method, optional (start, end_inclusive) from `Range: bytes=X-Y`).
fn parse_request(request: &str) -> (&str, Option<(u64, u64)>) {
    let mut method = "";
    let mut range = None;
    for line in request.lines() {
        let line = line.trim();
        if line.is_empty() {
            break;
        }
        if method.is_empty() {
            method = line.split_whitespace().next().unwrap_or("");
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            if name.trim().eq_ignore_ascii_case("range") {
                let value = value.trim();
                if let Some(spec) = value.strip_prefix("bytes=") {
                    if let Some((a, b)) = spec.split_once('-') {
                        let start = a.trim().parse::<u64>().unwrap_or(0);
                        let end_incl = if b.trim().is_empty() {
                            u64::MAX
                        } else {
                            b.trim().parse::<u64>().unwrap_or(0)
                        };
                        range = Some((start, end_incl));
                    }
                }
            }
        }
    }
    (method, range)
}

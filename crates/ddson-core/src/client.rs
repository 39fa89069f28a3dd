//! One-shot download client: ask the coordinator for a URL and write the
//! streamed artifact to a local file.

use std::path::Path;

use anyhow::{Context, Result};
use tokio::io::AsyncWriteExt;

use crate::rpc::{client as rpc, DownloadStatus};

/// Derive an output filename from the URL's last path segment.
pub fn output_name_from_url(url: &str) -> Result<String> {
    let parsed = url::Url::parse(url).with_context(|| format!("parse URL {url}"))?;
    let name = parsed
        .path_segments()
        .and_then(|segments| segments.last())
        .filter(|s| !s.is_empty())
        .unwrap_or("download");
    Ok(name.to_string())
}

/// Stream `url` through the coordinator into `output`. Status frames are
/// handed to `on_status` so the CLI can render progress however it likes.
/// Returns the number of artifact bytes written.
pub async fn download_to_file(
    coordinator: &str,
    url: &str,
    checksum: Option<&str>,
    output: &Path,
    mut on_status: impl FnMut(&DownloadStatus),
) -> Result<u64> {
    let mut stream = rpc::download(coordinator, 0, url, checksum).await?;

    // Created lazily so an immediately failing request leaves no empty file.
    let mut file: Option<tokio::fs::File> = None;
    let mut received = 0u64;

    while let Some(status) = stream.next().await? {
        on_status(&status);
        if let DownloadStatus::Transferring { data } = status {
            let f = match file.as_mut() {
                Some(f) => f,
                None => {
                    let created = tokio::fs::File::create(output)
                        .await
                        .with_context(|| format!("create {}", output.display()))?;
                    file.insert(created)
                }
            };
            f.write_all(&data)
                .await
                .with_context(|| format!("write {}", output.display()))?;
            received += data.len() as u64;
        }
    }

    // A zero-byte artifact still produces a file.
    if file.is_none() {
        tokio::fs::File::create(output)
            .await
            .with_context(|| format!("create {}", output.display()))?;
    } else if let Some(f) = file.as_mut() {
        f.flush().await?;
    }

    tracing::info!(url, output = %output.display(), received, "download finished");
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_name_is_last_segment() {
        assert_eq!(
            output_name_from_url("http://host/dir/archive.tar.gz").unwrap(),
            "archive.tar.gz"
        );
    }

    #[test]
    fn output_name_falls_back_for_bare_host() {
        assert_eq!(output_name_from_url("http://host/").unwrap(), "download");
    }

    #[test]
    fn output_name_rejects_garbage() {
        assert!(output_name_from_url("not a url").is_err());
    }
}

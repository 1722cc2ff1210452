//! Streaming resource download with a hard size cap.

use std::io::Write;

use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DownloadError {
    /// Message text is part of the notification contract.
    #[error("File too large to download")]
    TooLarge,
    #[error("download failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Download `url` to a temp file, streaming in chunks.
///
/// The cap is enforced twice: against the advertised `Content-Length` before
/// any byte is read, and against the cumulative byte count while streaming,
/// since origins lie and some omit the header entirely.
pub async fn download_to_tempfile(
    client: &reqwest::Client,
    url: &str,
    max_size: u64,
) -> Result<(NamedTempFile, u64), DownloadError> {
    let mut response = client.get(url).send().await?.error_for_status()?;

    if let Some(announced) = response.content_length() {
        if announced > max_size {
            return Err(DownloadError::TooLarge);
        }
    }

    let mut file = NamedTempFile::new()?;
    let mut written: u64 = 0;
    while let Some(chunk) = response.chunk().await? {
        written += chunk.len() as u64;
        if written > max_size {
            return Err(DownloadError::TooLarge);
        }
        file.write_all(&chunk)?;
    }
    file.flush()?;
    Ok((file, written))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn downloads_within_cap() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/data.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"a,b\n1,2".to_vec()))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let (file, size) =
            download_to_tempfile(&client, &format!("{}/data.csv", server.uri()), 1024)
                .await
                .unwrap();
        assert_eq!(size, 7);
        assert_eq!(std::fs::read(file.path()).unwrap(), b"a,b\n1,2");
    }

    #[tokio::test]
    async fn rejects_oversized_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big.csv"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 2048]))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let err = download_to_tempfile(&client, &format!("{}/big.csv", server.uri()), 1024)
            .await
            .unwrap_err();
        assert!(matches!(err, DownloadError::TooLarge));
        assert_eq!(err.to_string(), "File too large to download");
    }
}

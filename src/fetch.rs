//! Getting input media into memory or onto local disk, and packaging it for
//! remote APIs.

use base64::Engine;
use std::path::{Path, PathBuf};
use tempfile::TempPath;
use tracing::debug;

use crate::action::MediaInput;
use crate::error::{MediaError, Result};

/// An input that is available as a local file. URL inputs are downloaded to
/// a temporary file that is removed when this value is dropped.
pub struct LocalInput {
    path: PathBuf,
    _temp: Option<TempPath>,
}

impl LocalInput {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Download a URL fully into memory, returning the bytes and content type.
pub async fn download(client: &reqwest::Client, url: &str) -> Result<(Vec<u8>, Option<String>)> {
    debug!("Downloading {}", url);
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| MediaError::Network(format!("Failed to fetch {}: {}", url, e)))?;

    let status = response.status();
    if !status.is_success() {
        return Err(MediaError::Network(format!(
            "Failed to fetch {}: {}",
            url,
            status.canonical_reason().unwrap_or(status.as_str())
        )));
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string());
    let bytes = response
        .bytes()
        .await
        .map_err(|e| MediaError::Network(format!("Failed to read {}: {}", url, e)))?;

    Ok((bytes.to_vec(), content_type))
}

/// Read an input's bytes from disk or over HTTP.
pub async fn read_input(client: &reqwest::Client, input: &MediaInput) -> Result<(Vec<u8>, Option<String>)> {
    if input.source.is_empty() {
        return Err(MediaError::InvalidInput("Input source is required".to_string()));
    }
    if input.is_url {
        return download(client, &input.source).await;
    }
    let bytes = tokio::fs::read(&input.source).await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => MediaError::FileNotFound(input.source.clone()),
        _ => MediaError::Io(e),
    })?;
    Ok((bytes, None))
}

/// Make an input available as a local path.
pub async fn materialize(client: &reqwest::Client, input: &MediaInput) -> Result<LocalInput> {
    if !input.is_url {
        let path = PathBuf::from(&input.source);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(MediaError::FileNotFound(input.source.clone()));
        }
        return Ok(LocalInput { path, _temp: None });
    }

    let (bytes, _) = download(client, &input.source).await?;
    let suffix = input.extension().map(|ext| format!(".{}", ext)).unwrap_or_default();
    let file = tempfile::Builder::new()
        .prefix("agent-media-")
        .suffix(&suffix)
        .tempfile()?;
    tokio::fs::write(file.path(), &bytes).await?;
    let temp = file.into_temp_path();

    Ok(LocalInput {
        path: temp.to_path_buf(),
        _temp: Some(temp),
    })
}

/// Best-effort MIME type from a file extension.
pub fn mime_from_extension(ext: Option<&str>) -> &'static str {
    match ext {
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        Some("mp3") => "audio/mpeg",
        Some("wav") => "audio/wav",
        Some("m4a") => "audio/mp4",
        Some("ogg") => "audio/ogg",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn data_uri(bytes: &[u8], mime: &str) -> String {
    format!("data:{};base64,{}", mime, encode_base64(bytes))
}

/// Decode a `data:<mime>;base64,<payload>` URI.
pub fn decode_data_uri(uri: &str) -> Result<Vec<u8>> {
    let payload = uri
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(";base64,"))
        .map(|(_, payload)| payload)
        .ok_or_else(|| MediaError::Provider("Malformed data URI in provider output".to_string()))?;
    decode_base64(payload)
}

pub fn decode_base64(payload: &str) -> Result<Vec<u8>> {
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| MediaError::Provider(format!("Invalid base64 payload: {}", e)))
}

/// Reference to an input for a remote API: URLs pass through, local files
/// are inlined as data URIs.
pub async fn remote_reference(client: &reqwest::Client, input: &MediaInput) -> Result<String> {
    if input.is_url {
        return Ok(input.source.clone());
    }
    let (bytes, _) = read_input(client, input).await?;
    let mime = mime_from_extension(input.extension().as_deref());
    Ok(data_uri(&bytes, mime))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_uri_round_trip() {
        let uri = data_uri(b"\x89PNG", "image/png");
        assert!(uri.starts_with("data:image/png;base64,"));
        assert_eq!(decode_data_uri(&uri).unwrap(), b"\x89PNG");
        assert!(decode_data_uri("https://x/y.png").is_err());
    }

    #[test]
    fn test_mime_from_extension() {
        assert_eq!(mime_from_extension(Some("jpeg")), "image/jpeg");
        assert_eq!(mime_from_extension(Some("m4a")), "audio/mp4");
        assert_eq!(mime_from_extension(None), "application/octet-stream");
    }

    #[tokio::test]
    async fn test_local_inputs() {
        let client = reqwest::Client::new();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.wav");
        std::fs::write(&path, b"RIFF").unwrap();
        let input = MediaInput::from_raw(path.to_string_lossy());

        let local = materialize(&client, &input).await.unwrap();
        assert_eq!(local.path(), path.as_path());

        let reference = remote_reference(&client, &input).await.unwrap();
        assert!(reference.starts_with("data:audio/wav;base64,"));

        let missing = MediaInput::from_raw(dir.path().join("nope.wav").to_string_lossy());
        assert!(matches!(materialize(&client, &missing).await, Err(MediaError::FileNotFound(_))));
        assert!(matches!(read_input(&client, &missing).await, Err(MediaError::FileNotFound(_))));
    }
}

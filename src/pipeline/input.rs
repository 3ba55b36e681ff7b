//! Upload resolution: normalise a path, URL or byte buffer to a local file
//! and identify what kind of document it is.
//!
//! pdfium needs a file-system path, so URL downloads land in a `TempDir`
//! that lives as long as the [`ResolvedInput`]. The document kind is taken
//! from the magic bytes, never from the file extension.

use crate::error::FormScanError;
use crate::geometry::SourceKind;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

/// The resolved upload: a local path plus its detected kind.
pub enum ResolvedInput {
    /// Input was already a local file.
    Local { path: PathBuf, kind: SourceKind },
    /// Input was a URL; kept alive until processing completes.
    Downloaded {
        path: PathBuf,
        kind: SourceKind,
        _temp_dir: TempDir,
    },
}

impl ResolvedInput {
    pub fn path(&self) -> &Path {
        match self {
            ResolvedInput::Local { path, .. } => path,
            ResolvedInput::Downloaded { path, .. } => path,
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            ResolvedInput::Local { kind, .. } | ResolvedInput::Downloaded { kind, .. } => *kind,
        }
    }
}

/// Check if the input string looks like a URL.
pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Classify an upload by its first bytes: `%PDF`, PNG or JPEG.
pub fn sniff_kind(head: &[u8]) -> Option<SourceKind> {
    if head.starts_with(b"%PDF") {
        Some(SourceKind::Pdf)
    } else if head.starts_with(b"\x89PNG") || head.starts_with(&[0xFF, 0xD8, 0xFF]) {
        Some(SourceKind::Image)
    } else {
        None
    }
}

fn magic_of(head: &[u8]) -> [u8; 4] {
    let mut magic = [0u8; 4];
    let n = head.len().min(4);
    magic[..n].copy_from_slice(&head[..n]);
    magic
}

/// Resolve the input string to a local form file.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedInput, FormScanError> {
    if input.trim().is_empty() {
        return Err(FormScanError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(input)
    }
}

/// Resolve a local file path, validating existence and magic bytes.
pub fn resolve_local(path_str: &str) -> Result<ResolvedInput, FormScanError> {
    let path = PathBuf::from(path_str);

    if !path.exists() {
        return Err(FormScanError::FileNotFound { path });
    }

    let mut head = [0u8; 8];
    let read = match std::fs::File::open(&path) {
        Ok(mut f) => f.read(&mut head).unwrap_or(0),
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            return Err(FormScanError::PermissionDenied { path });
        }
        Err(_) => return Err(FormScanError::FileNotFound { path }),
    };

    let kind = sniff_kind(&head[..read]).ok_or_else(|| FormScanError::UnsupportedInput {
        path: path.clone(),
        magic: magic_of(&head[..read]),
    })?;

    debug!("Resolved local {:?} upload: {}", kind, path.display());
    Ok(ResolvedInput::Local { path, kind })
}

/// Download a URL to a temporary directory and return the path.
async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedInput, FormScanError> {
    info!("Downloading form from: {}", url);

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| FormScanError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            FormScanError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            FormScanError::DownloadFailed {
                url: url.to_string(),
                reason: e.to_string(),
            }
        }
    })?;

    if !response.status().is_success() {
        return Err(FormScanError::DownloadFailed {
            url: url.to_string(),
            reason: format!("HTTP {}", response.status()),
        });
    }

    let bytes = response
        .bytes()
        .await
        .map_err(|e| FormScanError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let temp_dir = TempDir::new().map_err(|e| FormScanError::Internal(e.to_string()))?;
    let file_path = temp_dir.path().join(extract_filename(url));

    let kind = sniff_kind(&bytes).ok_or_else(|| FormScanError::UnsupportedInput {
        path: file_path.clone(),
        magic: magic_of(&bytes),
    })?;

    tokio::fs::write(&file_path, &bytes)
        .await
        .map_err(|e| FormScanError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded to: {}", file_path.display());

    Ok(ResolvedInput::Downloaded {
        path: file_path,
        kind,
        _temp_dir: temp_dir,
    })
}

/// Last URL path segment when it looks like a file name.
fn extract_filename(url: &str) -> String {
    if let Ok(parsed) = reqwest::Url::parse(url) {
        if let Some(mut segments) = parsed.path_segments() {
            if let Some(last) = segments.next_back() {
                if !last.is_empty() && last.contains('.') {
                    return last.to_string();
                }
            }
        }
    }

    "upload.bin".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/form.pdf"));
        assert!(is_url("http://example.com/form.png"));
        assert!(!is_url("/tmp/form.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn sniffs_supported_kinds() {
        assert_eq!(sniff_kind(b"%PDF-1.7"), Some(SourceKind::Pdf));
        assert_eq!(sniff_kind(b"\x89PNG\r\n\x1a\n"), Some(SourceKind::Image));
        assert_eq!(sniff_kind(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(SourceKind::Image));
        assert_eq!(sniff_kind(b"GIF89a"), None);
        assert_eq!(sniff_kind(b""), None);
    }

    #[test]
    fn filename_from_url() {
        assert_eq!(extract_filename("https://x.org/a/form.pdf?x=1"), "form.pdf");
        assert_eq!(extract_filename("https://x.org/a/"), "upload.bin");
    }

    #[test]
    fn missing_file() {
        assert!(matches!(
            resolve_local("/no/such/form.pdf"),
            Err(FormScanError::FileNotFound { .. })
        ));
    }

    #[test]
    fn rejects_unknown_magic() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"hello world").unwrap();
        let err = resolve_local(tmp.path().to_str().unwrap()).err().unwrap();
        match err {
            FormScanError::UnsupportedInput { magic, .. } => assert_eq!(&magic, b"hell"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn accepts_pdf_magic() {
        let mut tmp = tempfile::NamedTempFile::new().unwrap();
        tmp.write_all(b"%PDF-1.4\n").unwrap();
        let resolved = resolve_local(tmp.path().to_str().unwrap()).unwrap();
        assert_eq!(resolved.kind(), SourceKind::Pdf);
    }

    #[tokio::test]
    async fn blank_input_is_invalid() {
        assert!(matches!(
            resolve_input("  ", 5).await,
            Err(FormScanError::InvalidInput { .. })
        ));
    }
}

//! Model source helpers
//!
//! Validates catalog source URLs, rewrites Hugging Face page links into direct
//! file links and formats byte counts for messages.

use reqwest::Url;

use crate::download::DownloadError;

const HUB_HOST: &str = "huggingface.co";

/// A file reference on the Hugging Face Hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HuggingFaceUrl {
    pub repo_id: String,
    pub revision: String,
    pub filename: String,
}

impl HuggingFaceUrl {
    /// Recognise `/<user>/<repo>/{blob,resolve}/<rev>/<file...>` paths.
    pub fn from_url(url: &Url) -> Option<Self> {
        if url.host_str() != Some(HUB_HOST) {
            return None;
        }
        let parts: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
        if parts.len() < 5 || !matches!(parts[2], "blob" | "resolve") {
            return None;
        }
        Some(Self {
            repo_id: format!("{}/{}", parts[0], parts[1]),
            revision: parts[3].to_string(),
            filename: parts[4..].join("/"),
        })
    }

    /// Direct link to the file contents.
    pub fn download_url(&self) -> String {
        format!(
            "https://{}/{}/resolve/{}/{}",
            HUB_HOST, self.repo_id, self.revision, self.filename
        )
    }
}

/// Parse a catalog source URL.
///
/// Only absolute `http`/`https` URLs with a host are accepted. Hub `blob` links
/// serve an HTML page, so they are rewritten to the matching `resolve` link.
pub fn normalize_source_url(raw: &str) -> Result<Url, DownloadError> {
    let url = Url::parse(raw.trim())
        .map_err(|e| DownloadError::InvalidModel(format!("{}: {}", raw, e)))?;

    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(DownloadError::InvalidModel(format!(
            "{}: unsupported source",
            raw
        )));
    }

    match HuggingFaceUrl::from_url(&url) {
        Some(hub) if url.path().contains("/blob/") => {
            let mut direct = Url::parse(&hub.download_url())
                .map_err(|e| DownloadError::InvalidModel(format!("{}: {}", raw, e)))?;
            direct.set_query(url.query());
            Ok(direct)
        }
        _ => Ok(url),
    }
}

/// Reduce a filename to something safe to place inside the models directory.
pub fn sanitize_local_filename(filename: &str) -> Result<String, DownloadError> {
    let trimmed = filename.trim();
    let flattened = trimmed
        .trim_start_matches('/')
        .replace('\\', "/")
        .replace('/', "__");

    let mut sanitized: String = flattened
        .chars()
        .map(|ch| {
            if matches!(ch, '<' | '>' | ':' | '"' | '|' | '?' | '*') || ch.is_control() {
                '_'
            } else {
                ch
            }
        })
        .collect();

    while sanitized.ends_with('.') || sanitized.ends_with(' ') {
        sanitized.pop();
    }

    if sanitized.is_empty() || sanitized.starts_with('.') {
        return Err(DownloadError::InvalidModel(format!(
            "invalid model filename {:?}",
            filename
        )));
    }

    Ok(sanitized)
}

/// Get a human-readable size string
pub fn format_size(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    let value = bytes as f64;
    if value < KB {
        format!("{} B", bytes)
    } else if value < KB * KB {
        format!("{:.2} KB", value / KB)
    } else if value < KB * KB * KB {
        format!("{:.2} MB", value / (KB * KB))
    } else {
        format!("{:.2} GB", value / (KB * KB * KB))
    }
}

//! Input images given as `http(s)` URLs or `data:image/...;base64,` URLs.
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;

use crate::error::{AppError, AppResult};

#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Url(String),
    Inline { mime: String, bytes: Vec<u8> },
}

impl ImageSource {
    pub fn parse(input: &str) -> AppResult<Self> {
        let input = input.trim();
        if input.starts_with("http://") || input.starts_with("https://") {
            return Ok(ImageSource::Url(input.to_string()));
        }
        if let Some(rest) = input.strip_prefix("data:image/") {
            let (header, encoded) = rest
                .split_once(',')
                .ok_or_else(|| AppError::InvalidInput("data URL has no payload".into()))?;
            let subtype = header
                .strip_suffix(";base64")
                .ok_or_else(|| AppError::InvalidInput("image data URL must be base64 encoded".into()))?;
            let bytes = BASE64
                .decode(encoded.trim())
                .map_err(|e| AppError::InvalidInput(format!("invalid base64 image: {}", e)))?;
            if bytes.is_empty() {
                return Err(AppError::InvalidInput("image data is empty".into()));
            }
            return Ok(ImageSource::Inline {
                mime: format!("image/{}", subtype),
                bytes,
            });
        }
        Err(AppError::InvalidInput(
            "image must be an http(s) URL or a base64 data:image URL".into(),
        ))
    }

    /// File extension to stage the image under.
    pub fn extension(&self) -> &str {
        fn from_path(s: &str) -> Option<&str> {
            let path = s.split(['?', '#']).next()?;
            let last = path.rsplit('/').next()?;
            let (_, ext) = last.rsplit_once('.')?;
            match ext.to_ascii_lowercase().as_str() {
                "png" | "jpg" | "jpeg" | "webp" | "gif" | "bmp" => Some(ext),
                _ => None,
            }
        }
        match self {
            ImageSource::Url(url) => from_path(url).unwrap_or("png"),
            ImageSource::Inline { mime, .. } => match mime.as_str() {
                "image/jpeg" | "image/jpg" => "jpg",
                "image/webp" => "webp",
                "image/gif" => "gif",
                _ => "png",
            },
        }
    }

    /// Image bytes, downloading URLs with `client`.
    pub async fn fetch(self, client: &Client) -> AppResult<Vec<u8>> {
        match self {
            ImageSource::Inline { bytes, .. } => Ok(bytes),
            ImageSource::Url(url) => {
                let response = client
                    .get(&url)
                    .send()
                    .await
                    .map_err(|e| AppError::InvalidInput(format!("failed to download image {}: {}", url, e)))?;
                if !response.status().is_success() {
                    return Err(AppError::InvalidInput(format!(
                        "failed to download image {}: HTTP {}",
                        url,
                        response.status()
                    )));
                }
                let bytes = response.bytes().await.map_err(AppError::HttpClient)?;
                tracing::debug!(url = %url, bytes = bytes.len(), "downloaded input image");
                Ok(bytes.to_vec())
            }
        }
    }
}

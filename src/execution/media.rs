use crate::page::MediaFile;
use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;

/// Resolve an attachment source into bytes: a `data:` URI is decoded in
/// place, anything else is fetched over HTTP.
pub async fn load_media(client: &reqwest::Client, source: &str) -> Result<MediaFile> {
    if source.starts_with("data:") {
        return decode_data_uri(source);
    }
    let resp = client
        .get(source)
        .send()
        .await
        .with_context(|| format!("failed to fetch attachment {source}"))?
        .error_for_status()
        .context("attachment fetch returned an error status")?;

    let mime = resp
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(';').next().unwrap_or(v).trim().to_string())
        .unwrap_or_else(|| "application/octet-stream".to_string());
    if !mime.starts_with("image/") {
        bail!("attachment is {mime}, expected an image");
    }
    let name = resp
        .url()
        .path_segments()
        .and_then(|mut segs| segs.next_back().map(str::to_string))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default_name(&mime));
    let bytes = resp.bytes().await.context("failed to read attachment body")?;
    Ok(MediaFile {
        name,
        mime,
        bytes: bytes.to_vec(),
    })
}

pub fn decode_data_uri(uri: &str) -> Result<MediaFile> {
    let rest = uri.strip_prefix("data:").context("not a data: URI")?;
    let (meta, payload) = rest.split_once(',').context("data: URI has no payload")?;
    let Some(mime) = meta.strip_suffix(";base64") else {
        bail!("only base64 data: URIs are supported");
    };
    if !mime.starts_with("image/") {
        bail!("attachment is {mime}, expected an image");
    }
    let bytes = STANDARD
        .decode(payload.trim())
        .context("invalid base64 in data: URI")?;
    Ok(MediaFile {
        name: default_name(mime),
        mime: mime.to_string(),
        bytes,
    })
}

fn default_name(mime: &str) -> String {
    let ext = match mime {
        "image/jpeg" => "jpg",
        "image/gif" => "gif",
        "image/webp" => "webp",
        _ => "png",
    };
    format!("attachment.{ext}")
}

//! Parser for the "aweme" item object shared by both platforms.
//!
//! Douyin's detail endpoints and TikTok's legacy feed endpoint return the
//! same object layout:
//!
//! ```json
//! {
//!   "aweme_id": "7301234567890123456",
//!   "desc": "caption",
//!   "create_time": 1700000000,
//!   "author": { "nickname": "someone" },
//!   "video": {
//!     "play_addr": { "url_list": ["https://..."], "data_size": 1024 },
//!     "bit_rate": [{ "bit_rate": 1200000, "play_addr": { "url_list": ["..."] } }],
//!     "cover": { "url_list": ["https://..."] }
//!   },
//!   "images": [{ "url_list": ["https://..."] }],
//!   "music": { "play_url": { "url_list": ["https://..."] } }
//! }
//! ```

use super::traits::ResolvedItem;
use crate::error::ExtractionError;
use crate::types::{AssetRef, ItemId, ItemMetadata, MediaType};
use chrono::DateTime;
use serde_json::Value;

/// First entry of `value.url_list`
pub(crate) fn first_url(value: &Value) -> Option<String> {
    value
        .get("url_list")?
        .as_array()?
        .iter()
        .filter_map(Value::as_str)
        .find(|u| !u.is_empty())
        .map(str::to_string)
}

/// Read a field that platforms send either as a string or as a number
pub(crate) fn string_or_number(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Read an integer that may arrive quoted
pub(crate) fn int_field(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

pub(crate) fn non_empty(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Watermarked play URLs differ from clean ones only by this path segment
fn strip_watermark(url: String) -> String {
    if url.contains("/playwm/") {
        url.replacen("/playwm/", "/play/", 1)
    } else {
        url
    }
}

/// Pick the highest bit-rate variant, falling back to the default play address
fn video_asset(video: &Value) -> Option<AssetRef> {
    let best = video
        .get("bit_rate")
        .and_then(Value::as_array)
        .and_then(|variants| {
            variants
                .iter()
                .filter(|v| v.get("play_addr").and_then(first_url).is_some())
                .max_by_key(|v| v.get("bit_rate").and_then(int_field).unwrap_or(0))
        })
        .and_then(|v| v.get("play_addr"));

    let play_addr = best.or_else(|| video.get("play_addr"))?;
    let url = first_url(play_addr)?;
    let size = play_addr
        .get("data_size")
        .and_then(int_field)
        .and_then(|s| u64::try_from(s).ok())
        .filter(|s| *s > 0);

    Some(AssetRef::new(strip_watermark(url), MediaType::Video).with_size(size))
}

/// Parse one aweme object into a resolved item
pub(crate) fn parse_aweme(
    platform: &'static str,
    aweme: &Value,
) -> Result<ResolvedItem, ExtractionError> {
    let schema = |detail: &str| ExtractionError::SchemaMismatch {
        platform,
        detail: detail.to_string(),
    };

    if !aweme.is_object() {
        return Err(schema("item is not an object"));
    }

    let id = aweme
        .get("aweme_id")
        .and_then(string_or_number)
        .ok_or_else(|| schema("item has no aweme_id"))?;

    let mut assets = Vec::new();

    let images: Vec<String> = aweme
        .get("images")
        .and_then(Value::as_array)
        .map(|images| images.iter().filter_map(first_url).collect())
        .unwrap_or_default();

    if images.is_empty() {
        let video = aweme
            .get("video")
            .filter(|v| v.is_object())
            .ok_or_else(|| schema("item has neither images nor video"))?;
        assets.push(video_asset(video).ok_or_else(|| schema("video has no play address"))?);
    } else {
        assets.extend(images.into_iter().map(|url| AssetRef::new(url, MediaType::Image)));
    }

    if let Some(music) = aweme
        .get("music")
        .and_then(|m| m.get("play_url"))
        .and_then(first_url)
    {
        assets.push(AssetRef::new(music, MediaType::Audio));
    }

    let cover = aweme.get("video").and_then(|v| {
        v.get("origin_cover")
            .and_then(first_url)
            .or_else(|| v.get("cover").and_then(first_url))
    });
    if let Some(cover) = cover {
        assets.push(AssetRef::new(cover, MediaType::Cover));
    }

    let metadata = ItemMetadata {
        platform: platform.to_string(),
        title: non_empty(aweme.get("desc")),
        author: non_empty(aweme.get("author").and_then(|a| a.get("nickname"))),
        created_at: aweme
            .get("create_time")
            .and_then(int_field)
            .filter(|t| *t > 0)
            .and_then(|t| DateTime::from_timestamp(t, 0)),
    };

    Ok(ResolvedItem {
        id: ItemId::new(id),
        assets,
        metadata,
    })
}

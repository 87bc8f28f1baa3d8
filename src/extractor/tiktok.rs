//! TikTok strategy.

use super::aweme::{int_field, non_empty, parse_aweme, string_or_number};
use super::traits::{PlatformStrategy, ResolvedItem};
use super::{NormalizedInput, RequestSigner, fetch_metadata, follow_to_id, host_authority};
use crate::error::ExtractionError;
use crate::fetcher::{FetchOptions, Fetcher};
use crate::types::{AssetRef, ItemId, ItemMetadata, MediaType};
use async_trait::async_trait;
use chrono::DateTime;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};

const PLATFORM: &str = "tiktok";

/// `statusCode` values for removed or private items
const GONE_CODES: &[i64] = &[10204, 10216, 10222];

/// `statusCode` values for throttling and verification walls
const THROTTLE_CODES: &[i64] = &[10000, 10101];

#[allow(clippy::expect_used, reason = "literal pattern, compiled by the unit tests")]
static PATH_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:/@[^/]+/(?:video|photo)/|/v/|/embed/(?:v2/)?)(\d+)")
        .expect("valid tiktok path pattern")
});

/// Resolves `tiktok.com` links
pub struct TikTokStrategy {
    api_base: String,
    api_authority: Option<String>,
    cookie: Option<String>,
    signer: Arc<dyn RequestSigner>,
}

impl std::fmt::Debug for TikTokStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TikTokStrategy")
            .field("api_base", &self.api_base)
            .field("signer", &self.signer.name())
            .finish()
    }
}

impl TikTokStrategy {
    /// Create a strategy querying `api_base`
    pub fn new(
        api_base: impl Into<String>,
        cookie: Option<String>,
        signer: Arc<dyn RequestSigner>,
    ) -> Self {
        let api_base = api_base.into().trim_end_matches('/').to_string();
        Self {
            api_authority: host_authority(&api_base),
            api_base,
            cookie,
            signer,
        }
    }

    fn detail_url(&self, id: &ItemId) -> String {
        format!("{}/api/item/detail/?itemId={}", self.api_base, id)
    }

    fn request_options(&self) -> FetchOptions {
        let mut options = FetchOptions::default().header("Referer", "https://www.tiktok.com/");
        if let Some(cookie) = &self.cookie {
            options = options.header("Cookie", cookie.clone());
        }
        options
    }
}

#[async_trait]
impl PlatformStrategy for TikTokStrategy {
    fn name(&self) -> &'static str {
        PLATFORM
    }

    fn matches(&self, input: &NormalizedInput) -> bool {
        match input {
            NormalizedInput::BareId(_) => false,
            NormalizedInput::Url(url) => {
                input.host_is("tiktok.com")
                    || (self.api_authority.is_some()
                        && host_authority(url.as_str()) == self.api_authority)
            }
        }
    }

    fn identify(&self, input: &NormalizedInput) -> Option<ItemId> {
        let url = input.url()?;
        PATH_ID_PATTERN
            .captures(url.path())
            .map(|c| ItemId::new(&c[1]))
    }

    async fn resolve(
        &self,
        input: &NormalizedInput,
        fetcher: &Fetcher,
    ) -> Result<ResolvedItem, ExtractionError> {
        let options = self.request_options();
        let id = follow_to_id(self, input, fetcher, &options).await?;

        let body = fetch_metadata(
            PLATFORM,
            self.signer.as_ref(),
            fetcher,
            &self.detail_url(&id),
            options,
        )
        .await?;

        parse_detail(&body, &id)
    }
}

/// Parse a detail response in either the current or the legacy shape
///
/// Current: `{"statusCode": 0, "itemInfo": {"itemStruct": {...}}}`.
/// Legacy: `{"status_code": 0, "aweme_list": [{...}]}`.
pub(crate) fn parse_detail(body: &[u8], id: &ItemId) -> Result<ResolvedItem, ExtractionError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ExtractionError::RateLimited {
            platform: PLATFORM,
            detail: "empty response body".to_string(),
        });
    }

    let value: Value = serde_json::from_slice(body).map_err(|e| ExtractionError::SchemaMismatch {
        platform: PLATFORM,
        detail: format!("response is not JSON: {}", e),
    })?;

    let code = value
        .get("statusCode")
        .or_else(|| value.get("status_code"))
        .and_then(Value::as_i64)
        .unwrap_or(0);
    if code != 0 {
        let message = non_empty(value.get("statusMsg"))
            .or_else(|| non_empty(value.get("status_msg")))
            .unwrap_or_default();
        if GONE_CODES.contains(&code) {
            return Err(ExtractionError::NotFound {
                id: id.to_string(),
                reason: format!("statusCode {} {}", code, message).trim_end().to_string(),
            });
        }
        if THROTTLE_CODES.contains(&code) {
            return Err(ExtractionError::RateLimited {
                platform: PLATFORM,
                detail: format!("statusCode {}", code),
            });
        }
        return Err(ExtractionError::SchemaMismatch {
            platform: PLATFORM,
            detail: format!("unknown statusCode {}: {}", code, message),
        });
    }

    if let Some(item) = value.get("itemInfo").and_then(|i| i.get("itemStruct")) {
        let item = parse_item_struct(item)?;
        if item.id != *id {
            return Err(ExtractionError::NotFound {
                id: id.to_string(),
                reason: format!("endpoint returned a different item ({})", item.id),
            });
        }
        return Ok(item);
    }

    if let Some(list) = value.get("aweme_list") {
        let list = list.as_array().ok_or_else(|| ExtractionError::SchemaMismatch {
            platform: PLATFORM,
            detail: "aweme_list is not an array".to_string(),
        })?;
        // The feed endpoint answers with neighbouring items when the requested one is gone
        let found = list
            .first()
            .map(|first| parse_aweme(PLATFORM, first))
            .transpose()?
            .filter(|item| item.id == *id);
        return found.ok_or_else(|| ExtractionError::NotFound {
            id: id.to_string(),
            reason: "aweme_list does not start with the requested item".to_string(),
        });
    }

    Err(ExtractionError::SchemaMismatch {
        platform: PLATFORM,
        detail: "neither itemInfo.itemStruct nor aweme_list present".to_string(),
    })
}

fn parse_item_struct(item: &Value) -> Result<ResolvedItem, ExtractionError> {
    let schema = |detail: &str| ExtractionError::SchemaMismatch {
        platform: PLATFORM,
        detail: detail.to_string(),
    };

    let id = item
        .get("id")
        .and_then(string_or_number)
        .ok_or_else(|| schema("itemStruct has no id"))?;

    let mut assets = Vec::new();

    let images: Vec<String> = item
        .get("imagePost")
        .and_then(|p| p.get("images"))
        .and_then(Value::as_array)
        .map(|images| {
            images
                .iter()
                .filter_map(|img| {
                    img.get("imageURL")?
                        .get("urlList")?
                        .as_array()?
                        .iter()
                        .filter_map(Value::as_str)
                        .find(|u| !u.is_empty())
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default();

    let video = item.get("video");
    if images.is_empty() {
        let video = video.ok_or_else(|| schema("itemStruct has neither imagePost nor video"))?;
        let url = non_empty(video.get("playAddr"))
            .or_else(|| non_empty(video.get("downloadAddr")))
            .ok_or_else(|| schema("video has no playAddr"))?;
        let size = video
            .get("size")
            .and_then(int_field)
            .and_then(|s| u64::try_from(s).ok())
            .filter(|s| *s > 0);
        assets.push(AssetRef::new(url, MediaType::Video).with_size(size));
    } else {
        assets.extend(images.into_iter().map(|url| AssetRef::new(url, MediaType::Image)));
    }

    if let Some(music) = non_empty(item.get("music").and_then(|m| m.get("playUrl"))) {
        assets.push(AssetRef::new(music, MediaType::Audio));
    }
    if let Some(cover) = video.and_then(|v| {
        non_empty(v.get("originCover")).or_else(|| non_empty(v.get("cover")))
    }) {
        assets.push(AssetRef::new(cover, MediaType::Cover));
    }

    let author = item.get("author").and_then(|a| match a {
        Value::String(_) => non_empty(Some(a)),
        _ => non_empty(a.get("nickname")).or_else(|| non_empty(a.get("uniqueId"))),
    });

    Ok(ResolvedItem {
        id: ItemId::new(id),
        assets,
        metadata: ItemMetadata {
            platform: PLATFORM.to_string(),
            title: non_empty(item.get("desc")),
            author,
            created_at: item
                .get("createTime")
                .and_then(int_field)
                .filter(|t| *t > 0)
                .and_then(|t| DateTime::from_timestamp(t, 0)),
        },
    })
}

//! Douyin strategy.

use super::aweme::{non_empty, parse_aweme};
use super::traits::{PlatformStrategy, ResolvedItem};
use super::{NormalizedInput, RequestSigner, fetch_metadata, follow_to_id, host_authority};
use crate::error::ExtractionError;
use crate::fetcher::{FetchOptions, Fetcher};
use crate::types::ItemId;
use async_trait::async_trait;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, LazyLock};

const PLATFORM: &str = "douyin";

const HOSTS: &[&str] = &["douyin.com", "iesdouyin.com"];

/// Query parameters web pages use to open an item in a modal
const ID_PARAMS: &[&str] = &["modal_id", "aweme_id", "vid"];

/// Messages Douyin puts in `status_msg` when it throttles
const THROTTLE_MARKERS: &[&str] = &["频繁", "too many", "limit", "verify", "验证"];

/// Messages Douyin puts in `status_msg` for removed or private items
const GONE_MARKERS: &[&str] = &["不存在", "删除", "私密", "not exist", "deleted", "private"];

#[allow(clippy::expect_used, reason = "literal pattern, compiled by the unit tests")]
static PATH_ID_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(?:video|note|slides|share/(?:video|note|slides))/(\d+)")
        .expect("valid douyin path pattern")
});

/// Resolves `douyin.com` / `iesdouyin.com` links and bare ids
pub struct DouyinStrategy {
    api_base: String,
    api_authority: Option<String>,
    cookie: Option<String>,
    signer: Arc<dyn RequestSigner>,
}

impl std::fmt::Debug for DouyinStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DouyinStrategy")
            .field("api_base", &self.api_base)
            .field("signer", &self.signer.name())
            .finish()
    }
}

impl DouyinStrategy {
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
        format!(
            "{}/aweme/v1/web/aweme/detail/?aweme_id={}&aid=6383&device_platform=webapp",
            self.api_base, id
        )
    }

    fn request_options(&self) -> FetchOptions {
        let mut options = FetchOptions::default().header("Referer", "https://www.douyin.com/");
        if let Some(cookie) = &self.cookie {
            options = options.header("Cookie", cookie.clone());
        }
        options
    }
}

#[async_trait]
impl PlatformStrategy for DouyinStrategy {
    fn name(&self) -> &'static str {
        PLATFORM
    }

    fn matches(&self, input: &NormalizedInput) -> bool {
        match input {
            NormalizedInput::BareId(_) => true,
            NormalizedInput::Url(url) => {
                HOSTS.iter().any(|h| input.host_is(h))
                    || (self.api_authority.is_some()
                        && host_authority(url.as_str()) == self.api_authority)
            }
        }
    }

    fn identify(&self, input: &NormalizedInput) -> Option<ItemId> {
        match input {
            NormalizedInput::BareId(id) => Some(ItemId::new(id.clone())),
            NormalizedInput::Url(url) => ID_PARAMS
                .iter()
                .find_map(|p| input.query_param(p))
                .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
                .or_else(|| {
                    PATH_ID_PATTERN
                        .captures(url.path())
                        .map(|c| c[1].to_string())
                })
                .map(ItemId::new),
        }
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
/// Current: `{"status_code": 0, "aweme_detail": {...}}`.
/// Legacy: `{"status_code": 0, "item_list": [{...}]}`.
pub(crate) fn parse_detail(body: &[u8], id: &ItemId) -> Result<ResolvedItem, ExtractionError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        // Unsigned or blocked requests get an empty 200
        return Err(ExtractionError::RateLimited {
            platform: PLATFORM,
            detail: "empty response body".to_string(),
        });
    }

    let value: Value = match serde_json::from_slice(body) {
        Ok(value) => value,
        Err(e) => {
            let text = String::from_utf8_lossy(body).to_lowercase();
            if text.contains("captcha") || text.contains("verify") {
                return Err(ExtractionError::RateLimited {
                    platform: PLATFORM,
                    detail: "verification page returned instead of JSON".to_string(),
                });
            }
            return Err(ExtractionError::SchemaMismatch {
                platform: PLATFORM,
                detail: format!("response is not JSON: {}", e),
            });
        }
    };

    check_status(&value, id)?;

    if let Some(detail) = value.get("aweme_detail") {
        if detail.is_null() {
            let reason = value
                .get("filter_detail")
                .and_then(|f| {
                    non_empty(f.get("detail_msg")).or_else(|| non_empty(f.get("filter_reason")))
                })
                .unwrap_or_else(|| "aweme_detail is null".to_string());
            return Err(ExtractionError::NotFound {
                id: id.to_string(),
                reason,
            });
        }
        let item = parse_aweme(PLATFORM, detail)?;
        if item.id != *id {
            return Err(ExtractionError::NotFound {
                id: id.to_string(),
                reason: format!("endpoint returned a different item ({})", item.id),
            });
        }
        return Ok(item);
    }

    if let Some(list) = value.get("item_list") {
        let list = list.as_array().ok_or_else(|| ExtractionError::SchemaMismatch {
            platform: PLATFORM,
            detail: "item_list is not an array".to_string(),
        })?;
        let Some(first) = list.first() else {
            return Err(ExtractionError::NotFound {
                id: id.to_string(),
                reason: "item_list is empty".to_string(),
            });
        };
        let item = parse_aweme(PLATFORM, first)?;
        if item.id != *id {
            return Err(ExtractionError::NotFound {
                id: id.to_string(),
                reason: format!("endpoint returned a different item ({})", item.id),
            });
        }
        return Ok(item);
    }

    Err(ExtractionError::SchemaMismatch {
        platform: PLATFORM,
        detail: "neither aweme_detail nor item_list present".to_string(),
    })
}

fn check_status(value: &Value, id: &ItemId) -> Result<(), ExtractionError> {
    let code = value.get("status_code").and_then(Value::as_i64).unwrap_or(0);
    if code == 0 {
        return Ok(());
    }

    let message = non_empty(value.get("status_msg")).unwrap_or_default();
    let lowered = message.to_lowercase();

    if THROTTLE_MARKERS.iter().any(|m| lowered.contains(m)) {
        return Err(ExtractionError::RateLimited {
            platform: PLATFORM,
            detail: format!("status_code {}: {}", code, message),
        });
    }
    if GONE_MARKERS.iter().any(|m| lowered.contains(m)) {
        return Err(ExtractionError::NotFound {
            id: id.to_string(),
            reason: message,
        });
    }
    Err(ExtractionError::SchemaMismatch {
        platform: PLATFORM,
        detail: format!("unknown status_code {}: {}", code, message),
    })
}

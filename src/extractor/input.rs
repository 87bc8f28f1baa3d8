//! Input normalization: share text, links and bare ids.
//!
//! Users paste anything from a bare id to a full share message such as
//! `"7.43 复制打开抖音，看看【xx的作品】 https://v.douyin.com/iRNBho6u/ 12/03 LWz:/"`.
//! Normalization pulls out the first link, drops tracking parameters and
//! leaves a canonical form strategies can match against.

use crate::error::ExtractionError;
use regex::Regex;
use std::sync::LazyLock;
use url::Url;

/// Query parameters that only track the sharer and never affect the item
const TRACKING_PARAMS: &[&str] = &[
    "previous_page",
    "enter_from",
    "is_copy_url",
    "is_from_webapp",
    "sender_device",
    "web_id",
    "_r",
    "_t",
    "u_code",
    "did",
    "iid",
    "timestamp",
    "checksum",
    "sec_user_id",
    "share_app_id",
    "share_iid",
];

/// Prefixes of tracking parameter families
const TRACKING_PREFIXES: &[&str] = &["utm_", "share_"];

// Stops at whitespace and at the full-width punctuation share texts use
#[allow(clippy::expect_used, reason = "literal pattern, compiled by the unit tests")]
static URL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?://[^\s<>"'，。！？、【】（）]+"#).expect("valid url pattern")
});

#[allow(clippy::expect_used, reason = "literal pattern, compiled by the unit tests")]
static BARE_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9A-Za-z_]{3,32}$").expect("valid bare id pattern"));

#[allow(clippy::expect_used, reason = "literal pattern, compiled by the unit tests")]
static SCHEMELESS_LINK_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-z0-9-]+\.)+(?:com|cn|net)/\S*$").expect("valid schemeless link pattern")
});

/// A cleaned-up input, either a link or a bare id
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NormalizedInput {
    /// A link with tracking parameters removed
    Url(Url),
    /// A bare platform id
    BareId(String),
}

impl NormalizedInput {
    /// Normalize raw user input
    pub fn parse(raw: &str) -> Result<Self, ExtractionError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(ExtractionError::InvalidInput {
                input: raw.to_string(),
                reason: "empty input".to_string(),
            });
        }

        if BARE_ID_PATTERN.is_match(trimmed) {
            return Ok(NormalizedInput::BareId(trimmed.to_string()));
        }

        let candidate = match URL_PATTERN.find(trimmed) {
            Some(m) => m.as_str().to_string(),
            None if SCHEMELESS_LINK_PATTERN.is_match(trimmed) => format!("https://{}", trimmed),
            None => {
                return Err(ExtractionError::InvalidInput {
                    input: raw.to_string(),
                    reason: "no link or id found".to_string(),
                });
            }
        };

        let mut url = Url::parse(&candidate).map_err(|e| ExtractionError::InvalidInput {
            input: raw.to_string(),
            reason: e.to_string(),
        })?;
        strip_tracking(&mut url);

        Ok(NormalizedInput::Url(url))
    }

    /// The link, if this input is one
    pub fn url(&self) -> Option<&Url> {
        match self {
            NormalizedInput::Url(url) => Some(url),
            NormalizedInput::BareId(_) => None,
        }
    }

    /// Lowercased host of the link
    pub fn host(&self) -> Option<String> {
        self.url()
            .and_then(|u| u.host_str())
            .map(|h| h.to_ascii_lowercase())
    }

    /// Whether the link's host is `domain` or a subdomain of it
    pub fn host_is(&self, domain: &str) -> bool {
        self.host()
            .is_some_and(|h| h == domain || h.ends_with(&format!(".{}", domain)))
    }

    /// Value of a query parameter
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.url()?
            .query_pairs()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.into_owned())
    }

    /// Canonical string form
    pub fn as_str(&self) -> &str {
        match self {
            NormalizedInput::Url(url) => url.as_str(),
            NormalizedInput::BareId(id) => id,
        }
    }
}

impl std::fmt::Display for NormalizedInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

fn is_tracking_param(name: &str) -> bool {
    TRACKING_PARAMS.contains(&name) || TRACKING_PREFIXES.iter().any(|p| name.starts_with(p))
}

/// Remove tracking parameters in place, dropping the query entirely when nothing is left
pub(crate) fn strip_tracking(url: &mut Url) {
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.set_fragment(None);
}

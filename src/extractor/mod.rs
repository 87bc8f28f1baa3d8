//! Link resolution
//!
//! Turns whatever the user pasted (share text, a web link, a short link or a
//! bare id) into a [`WorkItem`] whose assets are direct media URLs.
//!
//! Platforms plug in through [`PlatformStrategy`]. The [`ExtractorRegistry`]
//! normalizes the input once and hands it to the first strategy that
//! matches, so adding a platform never touches the scheduler.

mod aweme;
mod douyin;
mod input;
mod signer;
mod tiktok;
mod traits;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

pub use douyin::DouyinStrategy;
pub use input::NormalizedInput;
pub use signer::{NoopSigner, RequestSigner, SignableRequest};
pub use tiktok::TikTokStrategy;
pub use traits::{PlatformStrategy, ResolvedItem};

use crate::config::PlatformConfig;
use crate::error::ExtractionError;
use crate::fetcher::{FetchOptions, Fetcher};
use crate::types::{ItemId, ItemStatus, WorkItem};
use std::sync::Arc;
use url::Url;

/// Ordered set of platform strategies sharing one fetcher
#[derive(Clone)]
pub struct ExtractorRegistry {
    strategies: Vec<Arc<dyn PlatformStrategy>>,
    fetcher: Fetcher,
}

impl std::fmt::Debug for ExtractorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExtractorRegistry")
            .field("strategies", &self.strategy_names())
            .finish()
    }
}

impl ExtractorRegistry {
    /// Empty registry
    pub fn new(fetcher: Fetcher) -> Self {
        Self {
            strategies: Vec::new(),
            fetcher,
        }
    }

    /// Registry with the built-in Douyin and TikTok strategies
    ///
    /// Douyin is registered first, so bare ids resolve as Douyin items.
    pub fn with_defaults(
        fetcher: Fetcher,
        platforms: &PlatformConfig,
        signer: Arc<dyn RequestSigner>,
    ) -> Self {
        let mut registry = Self::new(fetcher);
        registry.register(Arc::new(DouyinStrategy::new(
            platforms.douyin_api_base.clone(),
            platforms.cookie("douyin").map(str::to_string),
            signer.clone(),
        )));
        registry.register(Arc::new(TikTokStrategy::new(
            platforms.tiktok_api_base.clone(),
            platforms.cookie("tiktok").map(str::to_string),
            signer,
        )));
        registry
    }

    /// Append a strategy; earlier registrations win on overlapping matches
    pub fn register(&mut self, strategy: Arc<dyn PlatformStrategy>) {
        tracing::debug!(platform = strategy.name(), "Registered platform strategy");
        self.strategies.push(strategy);
    }

    /// Names of the registered strategies, in match order
    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// The fetcher strategies resolve through
    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    fn strategy_for(
        &self,
        input: &NormalizedInput,
    ) -> Result<&Arc<dyn PlatformStrategy>, ExtractionError> {
        self.strategies
            .iter()
            .find(|s| s.matches(input))
            .ok_or_else(|| ExtractionError::Unsupported {
                input: input.to_string(),
            })
    }

    /// Extract the item id without touching the network
    ///
    /// `Ok(None)` means the input is supported but its id is only known
    /// after following the link.
    pub fn identify(&self, raw: &str) -> Result<Option<ItemId>, ExtractionError> {
        let input = NormalizedInput::parse(raw)?;
        Ok(self.strategy_for(&input)?.identify(&input))
    }

    /// Resolve `raw` into a work item in the `Resolved` state
    ///
    /// `id_hint` is the offline id the caller already derived, if any; the
    /// returned item carries the id the platform reports.
    pub async fn resolve(
        &self,
        id_hint: Option<&ItemId>,
        raw: &str,
    ) -> Result<WorkItem, ExtractionError> {
        let input = NormalizedInput::parse(raw)?;
        let strategy = self.strategy_for(&input)?;

        tracing::debug!(
            platform = strategy.name(),
            input = %input,
            id_hint = ?id_hint.map(ItemId::as_str),
            "Resolving input"
        );

        let resolved = strategy.resolve(&input, &self.fetcher).await?;

        if !resolved.id.is_path_safe() {
            return Err(ExtractionError::SchemaMismatch {
                platform: strategy.name(),
                detail: format!("unusable item id {:?}", resolved.id.as_str()),
            });
        }

        if let Some(hint) = id_hint
            && *hint != resolved.id
        {
            tracing::debug!(
                id_hint = %hint,
                item_id = %resolved.id,
                "Platform reported a different id than the link carried"
            );
        }

        let mut item = WorkItem::new(resolved.id, raw.trim());
        item.transition(ItemStatus::Resolving);
        item.transition(ItemStatus::Resolved);
        item.assets = resolved.assets;
        item.metadata = resolved.metadata;

        tracing::debug!(
            item_id = %item.id,
            platform = strategy.name(),
            assets = item.assets.len(),
            "Input resolved"
        );

        Ok(item)
    }
}

/// Host and effective port of `url`, lowercased
pub(crate) fn host_authority(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    Some(match parsed.port_or_known_default() {
        Some(port) => format!("{}:{}", host, port),
        None => host,
    })
}

/// Learn the item id, following the link when the id is not in it
pub(crate) async fn follow_to_id<S>(
    strategy: &S,
    input: &NormalizedInput,
    fetcher: &Fetcher,
    options: &FetchOptions,
) -> Result<ItemId, ExtractionError>
where
    S: PlatformStrategy + ?Sized,
{
    if let Some(id) = strategy.identify(input) {
        return Ok(id);
    }

    let Some(url) = input.url() else {
        return Err(ExtractionError::InvalidInput {
            input: input.to_string(),
            reason: "no id in input".to_string(),
        });
    };

    let target = fetcher.resolve_redirects(url.as_str(), options).await?;
    let followed = NormalizedInput::parse(&target)?;

    strategy
        .identify(&followed)
        .ok_or_else(|| ExtractionError::NotFound {
            id: input.to_string(),
            reason: format!("link leads to {} which is not an item page", followed),
        })
}

/// Sign and send a metadata request, returning the raw body
pub(crate) async fn fetch_metadata(
    platform: &'static str,
    signer: &dyn RequestSigner,
    fetcher: &Fetcher,
    endpoint: &str,
    options: FetchOptions,
) -> Result<Vec<u8>, ExtractionError> {
    let url = Url::parse(endpoint).map_err(|e| ExtractionError::InvalidInput {
        input: endpoint.to_string(),
        reason: e.to_string(),
    })?;

    let request = signer
        .sign(SignableRequest {
            platform,
            url,
            options,
        })
        .await?;

    tracing::debug!(platform, url = %request.url, signer = signer.name(), "Fetching item metadata");

    Ok(fetcher.get_bytes(request.url.as_str(), &request.options).await?)
}

//! Traits and types for platform strategies

use super::input::NormalizedInput;
use crate::error::ExtractionError;
use crate::fetcher::Fetcher;
use crate::types::{AssetRef, ItemId, ItemMetadata};
use async_trait::async_trait;

/// Outcome of resolving one input against a platform
#[must_use]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedItem {
    /// Platform-native id
    pub id: ItemId,
    /// Every asset the platform exposes, in platform order
    pub assets: Vec<AssetRef>,
    /// Descriptive metadata
    pub metadata: ItemMetadata,
}

/// A platform the engine knows how to resolve
///
/// Strategies are registered with an
/// [`ExtractorRegistry`](super::ExtractorRegistry) and tried in
/// registration order; the first one whose [`matches`](Self::matches)
/// returns true owns the input.
///
/// # Examples
///
/// ```no_run
/// use async_trait::async_trait;
/// use douk_dl::error::ExtractionError;
/// use douk_dl::extractor::{NormalizedInput, PlatformStrategy, ResolvedItem};
/// use douk_dl::fetcher::Fetcher;
/// use douk_dl::types::ItemId;
///
/// struct Example;
///
/// #[async_trait]
/// impl PlatformStrategy for Example {
///     fn name(&self) -> &'static str {
///         "example"
///     }
///
///     fn matches(&self, input: &NormalizedInput) -> bool {
///         input.host_is("example.com")
///     }
///
///     fn identify(&self, input: &NormalizedInput) -> Option<ItemId> {
///         input.query_param("id").map(ItemId::from)
///     }
///
///     async fn resolve(
///         &self,
///         input: &NormalizedInput,
///         _fetcher: &Fetcher,
///     ) -> Result<ResolvedItem, ExtractionError> {
///         Err(ExtractionError::Unsupported { input: input.to_string() })
///     }
/// }
/// ```
#[async_trait]
pub trait PlatformStrategy: Send + Sync {
    /// Short lowercase name, recorded as the item's platform
    fn name(&self) -> &'static str;

    /// Whether this strategy owns the input
    fn matches(&self, input: &NormalizedInput) -> bool;

    /// Extract the item id without any network access
    ///
    /// Returns `None` when the id can only be learned by following the
    /// link (share short links).
    fn identify(&self, input: &NormalizedInput) -> Option<ItemId>;

    /// Resolve the input into its assets
    ///
    /// # Errors
    ///
    /// - [`ExtractionError::NotFound`] when the item is deleted or private
    /// - [`ExtractionError::RateLimited`] when the platform signals throttling
    /// - [`ExtractionError::SchemaMismatch`] when the response shape is unknown
    /// - [`ExtractionError::Transport`] for network failures
    async fn resolve(
        &self,
        input: &NormalizedInput,
        fetcher: &Fetcher,
    ) -> Result<ResolvedItem, ExtractionError>;
}

//! Core types and events for douk-dl

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::ErrorInfo;

/// Platform-native item identifier (e.g. a Douyin `aweme_id`)
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    /// Create a new ItemId
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the inner string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id can name a directory under the download root
    ///
    /// Only ASCII letters, digits, `_` and `-` are allowed, so an id can never
    /// be empty, contain a separator or climb out with `..`.
    pub fn is_path_safe(&self) -> bool {
        !self.0.is_empty()
            && self.0.len() <= 64
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
    }
}

impl From<&str> for ItemId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ItemId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl AsRef<str> for ItemId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<&str> for ItemId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// Implement sqlx Type, Encode, and Decode for database operations
impl sqlx::Type<sqlx::Sqlite> for ItemId {
    fn type_info() -> sqlx::sqlite::SqliteTypeInfo {
        <String as sqlx::Type<sqlx::Sqlite>>::type_info()
    }

    fn compatible(ty: &sqlx::sqlite::SqliteTypeInfo) -> bool {
        <String as sqlx::Type<sqlx::Sqlite>>::compatible(ty)
    }
}

impl<'q> sqlx::Encode<'q, sqlx::Sqlite> for ItemId {
    fn encode_by_ref(
        &self,
        buf: &mut Vec<sqlx::sqlite::SqliteArgumentValue<'q>>,
    ) -> Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync>> {
        sqlx::Encode::<sqlx::Sqlite>::encode_by_ref(&self.0, buf)
    }
}

impl<'r> sqlx::Decode<'r, sqlx::Sqlite> for ItemId {
    fn decode(value: sqlx::sqlite::SqliteValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let id = <String as sqlx::Decode<sqlx::Sqlite>>::decode(value)?;
        Ok(Self(id))
    }
}

/// Identifier of one `submit` call
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub u64);

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a work item
///
/// ```text
/// Pending -> Resolving -> Resolved -> Downloading -> Done
///               ^            |
///               +------------+  (signed URL refresh, before Downloading)
/// any non-terminal -> Failed | Skipped
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    /// Accepted, waiting for a worker
    Pending,
    /// Extractor is resolving the input
    Resolving,
    /// Assets resolved, download not started
    Resolved,
    /// Assets are being fetched and committed
    Downloading,
    /// Committed and recorded
    Done,
    /// Terminal failure
    Failed,
    /// Already downloaded (or collapsed duplicate)
    Skipped,
}

impl ItemStatus {
    /// Whether this status ends the item's lifecycle
    pub fn is_terminal(&self) -> bool {
        matches!(self, ItemStatus::Done | ItemStatus::Failed | ItemStatus::Skipped)
    }

    /// Whether moving from `self` to `next` is a legal transition
    pub fn can_transition_to(&self, next: ItemStatus) -> bool {
        use ItemStatus::*;
        match (self, next) {
            (from, _) if from.is_terminal() => false,
            (_, Failed) | (_, Skipped) => true,
            (Pending, Resolving) => true,
            (Resolving, Resolved) => true,
            (Resolved, Resolving) => true,
            (Resolved, Downloading) => true,
            (Downloading, Done) => true,
            // A new item-level attempt starts over from resolution
            (Downloading, Resolving) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Resolving => "resolving",
            ItemStatus::Resolved => "resolved",
            ItemStatus::Downloading => "downloading",
            ItemStatus::Done => "done",
            ItemStatus::Failed => "failed",
            ItemStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Kind of media an asset carries
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    /// The main video stream
    Video,
    /// One picture of an image post
    Image,
    /// Background music track
    Audio,
    /// Cover / thumbnail
    Cover,
}

impl MediaType {
    /// File extension used when the URL does not reveal one
    pub fn default_extension(&self) -> &'static str {
        match self {
            MediaType::Video => "mp4",
            MediaType::Image => "jpeg",
            MediaType::Audio => "mp3",
            MediaType::Cover => "jpeg",
        }
    }
}

/// Advertised digest of an asset body
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "algorithm", content = "hex", rename_all = "lowercase")]
pub enum Checksum {
    /// MD5, as exposed by some CDN `ETag`s
    Md5(String),
    /// SHA-256
    Sha256(String),
}

/// A single resolved, fetchable media URL belonging to a work item
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    /// Possibly signed and time-limited URL
    pub url: String,
    /// What the URL points at
    pub media_type: MediaType,
    /// Size in bytes if the platform advertises it
    pub expected_size: Option<u64>,
    /// Digest if the platform advertises one
    pub checksum: Option<Checksum>,
    /// Incremented every time the URL is refreshed after expiry
    pub generation: u32,
}

/// Query parameters CDNs use to carry the signature expiry (unix seconds)
const EXPIRY_PARAMS: &[&str] = &["x-expires", "expires", "x-expire", "expire"];

impl AssetRef {
    /// Create a first-generation asset reference
    pub fn new(url: impl Into<String>, media_type: MediaType) -> Self {
        Self {
            url: url.into(),
            media_type,
            expected_size: None,
            checksum: None,
            generation: 0,
        }
    }

    /// Attach an advertised size
    pub fn with_size(mut self, size: Option<u64>) -> Self {
        self.expected_size = size;
        self
    }

    /// Attach an advertised checksum
    pub fn with_checksum(mut self, checksum: Option<Checksum>) -> Self {
        self.checksum = checksum;
        self
    }

    /// Expiry encoded in the signed URL, if any
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let parsed = url::Url::parse(&self.url).ok()?;
        parsed
            .query_pairs()
            .find(|(k, _)| EXPIRY_PARAMS.contains(&k.as_ref()))
            .and_then(|(_, v)| v.parse::<i64>().ok())
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
    }

    /// Whether the signature expires within `margin` of `now`
    pub fn is_expired(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin =
            chrono::Duration::from_std(margin).unwrap_or_else(|_| chrono::Duration::zero());
        self.expires_at().is_some_and(|exp| exp <= now + margin)
    }

    /// Replace the URL with a freshly signed one, bumping the generation
    pub fn refresh(&mut self, fresh: &AssetRef) {
        self.url = fresh.url.clone();
        self.expected_size = fresh.expected_size.or(self.expected_size);
        self.checksum = fresh.checksum.clone().or(self.checksum.take());
        self.generation += 1;
    }

    /// File name this asset is stored under inside the item directory
    ///
    /// `index` is the position among assets of the same media type.
    pub fn file_name(&self, index: usize) -> String {
        let ext = self.url_extension().unwrap_or(self.media_type.default_extension());
        match self.media_type {
            MediaType::Video if index == 0 => format!("video.{ext}"),
            MediaType::Video => format!("video_{:02}.{ext}", index + 1),
            MediaType::Image => format!("image_{:02}.{ext}", index + 1),
            MediaType::Audio => format!("music.{ext}"),
            MediaType::Cover => format!("cover.{ext}"),
        }
    }

    fn url_extension(&self) -> Option<&'static str> {
        let parsed = url::Url::parse(&self.url).ok()?;
        let last = parsed.path_segments()?.next_back()?.to_ascii_lowercase();
        let ext = last.rsplit_once('.')?.1.to_string();
        ["mp4", "mp3", "m4a", "jpeg", "jpg", "png", "webp", "heic"]
            .into_iter()
            .find(|known| *known == ext)
    }
}

/// Descriptive metadata captured during resolution
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemMetadata {
    /// Strategy that resolved the item ("douyin", "tiktok")
    pub platform: String,
    /// Caption / description
    pub title: Option<String>,
    /// Author nickname
    pub author: Option<String>,
    /// Publication time
    pub created_at: Option<DateTime<Utc>>,
}

/// Unit of work tracking one requested download through its lifecycle
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkItem {
    /// Platform-native id (unique within a batch)
    pub id: ItemId,
    /// Input as submitted
    pub source_url: String,
    /// Current lifecycle state
    pub status: ItemStatus,
    /// Resolved assets, in platform order
    pub assets: Vec<AssetRef>,
    /// Number of item-level attempts started
    pub attempts: u32,
    /// Most recent failure
    pub last_error: Option<ErrorInfo>,
    /// Descriptive metadata
    pub metadata: ItemMetadata,
}

impl WorkItem {
    /// Create a pending work item
    pub fn new(id: ItemId, source_url: impl Into<String>) -> Self {
        Self {
            id,
            source_url: source_url.into(),
            status: ItemStatus::Pending,
            assets: Vec::new(),
            attempts: 0,
            last_error: None,
            metadata: ItemMetadata::default(),
        }
    }

    /// Move to `next`, refusing illegal transitions
    ///
    /// Returns `false` (and leaves the status unchanged) when the transition
    /// is not allowed by the state machine.
    pub fn transition(&mut self, next: ItemStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            tracing::warn!(
                item_id = %self.id,
                from = %self.status,
                to = %next,
                "Rejected illegal work item transition"
            );
            false
        }
    }
}

/// Durable proof that an id was previously fully downloaded
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupRecord {
    /// Item id
    pub id: ItemId,
    /// When the item was committed (None for rows imported from legacy databases)
    pub completed_at: Option<DateTime<Utc>>,
    /// Item directory (None for rows imported from legacy databases)
    pub destination: Option<PathBuf>,
}

/// Persisted name/value option
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionRecord {
    /// Unique option name
    pub name: String,
    /// Option value
    pub value: String,
}

/// Per-batch options supplied with a submission
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct SubmitOptions {
    /// Re-download items that already have a dedup record
    #[serde(default)]
    pub force: bool,
    /// Worker count for this batch (None = configured default)
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Wall-clock budget for this batch (None = configured default)
    #[serde(default)]
    pub timeout: Option<Duration>,
}

/// Terminal outcome of one id within a batch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultEvent {
    /// Item id (the normalized input when resolution failed before an id was known)
    pub id: ItemId,
    /// `Done`, `Failed` or `Skipped`
    pub status: ItemStatus,
    /// Item directory for `Done` and dedup-skipped items
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<PathBuf>,
    /// Cause for `Failed`, reason for some `Skipped`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo>,
    /// Item-level attempts spent
    pub attempts: u32,
}

impl ResultEvent {
    /// Successful commit
    pub fn done(id: ItemId, destination: PathBuf, attempts: u32) -> Self {
        Self {
            id,
            status: ItemStatus::Done,
            destination: Some(destination),
            error: None,
            attempts,
        }
    }

    /// Skipped because a dedup record exists
    pub fn skipped(id: ItemId, destination: Option<PathBuf>) -> Self {
        Self {
            id,
            status: ItemStatus::Skipped,
            destination,
            error: None,
            attempts: 0,
        }
    }

    /// Terminal failure
    pub fn failed(id: ItemId, error: ErrorInfo, attempts: u32) -> Self {
        Self {
            id,
            status: ItemStatus::Failed,
            destination: None,
            error: Some(error),
            attempts,
        }
    }
}

/// Aggregate counters for one batch
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    /// Batch id
    pub batch_id: Option<BatchId>,
    /// Distinct ids in the batch
    pub total: usize,
    /// Terminal `Done` events
    pub succeeded: usize,
    /// Terminal `Failed` events
    pub failed: usize,
    /// Terminal `Skipped` events
    pub skipped: usize,
    /// Whether the batch was cancelled or hit its deadline
    pub cancelled: bool,
}

impl BatchSummary {
    /// Count one terminal event
    pub fn record(&mut self, event: &ResultEvent) {
        match event.status {
            ItemStatus::Done => self.succeeded += 1,
            ItemStatus::Failed => self.failed += 1,
            ItemStatus::Skipped => self.skipped += 1,
            _ => {}
        }
    }

    /// Number of terminal events counted so far
    pub fn finished(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

/// Progress event broadcast to subscribers
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    /// A batch was accepted
    BatchStarted {
        /// Batch id
        batch_id: BatchId,
        /// Distinct ids queued
        items: usize,
    },

    /// A work item changed state
    StatusChanged {
        /// Batch id
        batch_id: BatchId,
        /// Item id
        id: ItemId,
        /// New state
        status: ItemStatus,
    },

    /// One asset of an item is fully staged
    AssetStaged {
        /// Batch id
        batch_id: BatchId,
        /// Item id
        id: ItemId,
        /// Position in the item's asset list
        index: usize,
        /// Bytes on disk
        bytes: u64,
    },

    /// An item-level attempt failed and will be retried
    Retrying {
        /// Batch id
        batch_id: BatchId,
        /// Item id
        id: ItemId,
        /// Attempt that failed (1-based)
        attempt: u32,
        /// Why it failed
        error: ErrorInfo,
        /// Delay before the next attempt, in milliseconds
        delay_ms: u64,
    },

    /// Terminal outcome for one id
    Finished {
        /// Batch id
        batch_id: BatchId,
        /// The terminal event
        result: ResultEvent,
    },

    /// Batch done; counters are final
    BatchFinished {
        /// Final counters
        summary: BatchSummary,
    },

    /// Downloader is shutting down
    Shutdown,
}

/// Liveness report for the health-check wrapper
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    /// A trivial query against the store succeeded
    pub store_reachable: bool,
    /// Whether new batches are accepted
    pub accepting: bool,
    /// Batches currently running
    pub active_batches: usize,
    /// Running batches whose dispatch loop has not made progress recently
    pub stalled_batches: Vec<BatchId>,
}

impl HealthReport {
    /// Overall verdict
    pub fn is_healthy(&self) -> bool {
        self.store_reachable && self.stalled_batches.is_empty()
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_only_moves_forward() {
        use ItemStatus::*;
        assert!(Pending.can_transition_to(Resolving));
        assert!(Resolving.can_transition_to(Resolved));
        assert!(Resolved.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Done));

        assert!(!Resolved.can_transition_to(Pending));
        assert!(!Downloading.can_transition_to(Resolved));
        assert!(!Pending.can_transition_to(Done));
        assert!(!Done.can_transition_to(Failed));
        assert!(!Skipped.can_transition_to(Resolving));
    }

    #[test]
    fn refresh_loop_only_from_resolved() {
        use ItemStatus::*;
        assert!(Resolved.can_transition_to(Resolving));
        assert!(!Done.can_transition_to(Resolving));
    }

    #[test]
    fn only_plain_ids_are_path_safe() {
        assert!(ItemId::from("7301234567890123456").is_path_safe());
        assert!(ItemId::from("abc_12-x").is_path_safe());
        assert!(!ItemId::new("9".repeat(65)).is_path_safe());
        for id in ["", ".", "..", "../x", "a/b", "a\\b", "https://v.douyin.com/x/"] {
            assert!(!ItemId::from(id).is_path_safe(), "{id:?}");
        }
    }

    #[test]
    fn work_item_rejects_illegal_transition() {
        let mut item = WorkItem::new(ItemId::from("1"), "1");
        assert!(!item.transition(ItemStatus::Done));
        assert_eq!(item.status, ItemStatus::Pending);
        assert!(item.transition(ItemStatus::Resolving));
        assert!(item.transition(ItemStatus::Failed));
        assert!(!item.transition(ItemStatus::Resolving));
    }

    #[test]
    fn asset_expiry_from_signed_url() {
        let asset = AssetRef::new(
            "https://v26.cdn.example/video/tos/abc/?x-expires=1700000000&x-signature=xyz",
            MediaType::Video,
        );
        let expires = asset.expires_at().unwrap();
        assert_eq!(expires.timestamp(), 1_700_000_000);

        let before = DateTime::from_timestamp(1_699_999_000, 0).unwrap();
        let after = DateTime::from_timestamp(1_700_000_100, 0).unwrap();
        assert!(!asset.is_expired(before, Duration::from_secs(60)));
        assert!(asset.is_expired(before, Duration::from_secs(3600)));
        assert!(asset.is_expired(after, Duration::ZERO));
    }

    #[test]
    fn unsigned_asset_never_expires() {
        let asset = AssetRef::new("https://cdn.example/a.jpeg", MediaType::Image);
        assert!(asset.expires_at().is_none());
        assert!(!asset.is_expired(Utc::now(), Duration::from_secs(3600)));
    }

    #[test]
    fn refresh_bumps_generation() {
        let mut asset = AssetRef::new("https://cdn.example/old?x-expires=1", MediaType::Video)
            .with_size(Some(10));
        asset.refresh(&AssetRef::new(
            "https://cdn.example/new?x-expires=2",
            MediaType::Video,
        ));
        assert_eq!(asset.generation, 1);
        assert!(asset.url.contains("new"));
        assert_eq!(asset.expected_size, Some(10));
    }

    #[test]
    fn file_names_follow_media_type() {
        let video = AssetRef::new("https://cdn.example/play/?video_id=1", MediaType::Video);
        assert_eq!(video.file_name(0), "video.mp4");

        let image = AssetRef::new("https://cdn.example/img/abc.webp", MediaType::Image);
        assert_eq!(image.file_name(2), "image_03.webp");

        let music = AssetRef::new("https://cdn.example/m/track.mp3", MediaType::Audio);
        assert_eq!(music.file_name(0), "music.mp3");
    }

    #[test]
    fn summary_counts_terminal_events() {
        let mut summary = BatchSummary::default();
        summary.record(&ResultEvent::done(ItemId::from("a"), PathBuf::from("/x/a"), 1));
        summary.record(&ResultEvent::skipped(ItemId::from("b"), None));
        summary.record(&ResultEvent::failed(
            ItemId::from("c"),
            ErrorInfo::cancelled("stop"),
            0,
        ));
        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.finished(), 3);
    }
}

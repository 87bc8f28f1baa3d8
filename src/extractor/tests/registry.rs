use super::{registry_for, single_shot_fetcher, video_aweme};
use crate::error::{ErrorKind, ExtractionError};
use crate::extractor::{
    ExtractorRegistry, NormalizedInput, PlatformStrategy, RequestSigner, ResolvedItem,
    SignableRequest,
};
use crate::fetcher::Fetcher;
use crate::types::{ItemId, ItemStatus};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const UNUSED_BASE: &str = "https://tiktok.invalid";

#[tokio::test]
async fn test_resolve_douyin_link() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/aweme/v1/web/aweme/detail/"))
        .and(query_param("aweme_id", "7301"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "status_code": 0, "aweme_detail": video_aweme("7301") })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let registry = registry_for(&server.uri(), UNUSED_BASE);
    let item = registry
        .resolve(
            Some(&ItemId::from("7301")),
            "  看看这个 https://www.douyin.com/video/7301?previous_page=app_code_link ",
        )
        .await
        .unwrap();

    assert_eq!(item.id, "7301");
    assert_eq!(item.status, ItemStatus::Resolved);
    assert_eq!(item.assets.len(), 3);
    assert_eq!(item.metadata.title.as_deref(), Some("a clip"));
    assert_eq!(
        item.source_url,
        "看看这个 https://www.douyin.com/video/7301?previous_page=app_code_link"
    );
}

#[tokio::test]
async fn test_short_link_followed_before_metadata() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/s/iRNBho6u/"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", "/share/video/7301/?region=CN"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/share/video/7301/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/aweme/v1/web/aweme/detail/"))
        .and(query_param("aweme_id", "7301"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "status_code": 0, "item_list": [video_aweme("7301")] })),
        )
        .mount(&server)
        .await;

    let registry = registry_for(&server.uri(), UNUSED_BASE);
    let raw = format!("{}/s/iRNBho6u/", server.uri());

    assert_eq!(registry.identify(&raw).unwrap(), None, "short links need the network");

    let item = registry.resolve(None, &raw).await.unwrap();
    assert_eq!(item.id, "7301");
}

#[tokio::test]
async fn test_metadata_404_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let registry = registry_for(&server.uri(), UNUSED_BASE);
    let err = registry.resolve(None, "7301").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[tokio::test]
async fn test_metadata_429_is_rate_limited() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(429))
        .mount(&server)
        .await;

    let registry = registry_for(&server.uri(), UNUSED_BASE);
    let err = registry.resolve(None, "7301").await.unwrap_err();
    assert!(matches!(err, ExtractionError::RateLimited { .. }), "{err:?}");
}

#[tokio::test]
async fn test_tiktok_link_routed_to_tiktok() {
    let douyin = MockServer::start().await;
    let tiktok = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/item/detail/"))
        .and(query_param("itemId", "7231"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "statusCode": 0,
            "itemInfo": { "itemStruct": {
                "id": "7231",
                "video": { "playAddr": "https://v16.example/7231.mp4" }
            }}
        })))
        .expect(1)
        .mount(&tiktok)
        .await;

    let registry = registry_for(&douyin.uri(), &tiktok.uri());
    let item = registry
        .resolve(None, "https://www.tiktok.com/@some.one/video/7231?is_from_webapp=1")
        .await
        .unwrap();

    assert_eq!(item.id, "7231");
    assert_eq!(item.metadata.platform, "tiktok");
    assert!(douyin.received_requests().await.unwrap().is_empty());
}

#[test]
fn test_identify_offline() {
    let registry = registry_for("https://www.douyin.com", "https://www.tiktok.com");

    assert_eq!(
        registry.identify("https://www.douyin.com/video/7301").unwrap(),
        Some(ItemId::from("7301"))
    );
    assert_eq!(registry.identify("7301").unwrap(), Some(ItemId::from("7301")));

    let err = registry.identify("https://www.youtube.com/watch?v=abc").unwrap_err();
    assert!(matches!(err, ExtractionError::Unsupported { .. }), "{err:?}");

    let err = registry.identify("no link in here at all").unwrap_err();
    assert!(matches!(err, ExtractionError::InvalidInput { .. }), "{err:?}");
}

struct HeaderSigner;

#[async_trait]
impl RequestSigner for HeaderSigner {
    async fn sign(&self, mut request: SignableRequest) -> Result<SignableRequest, ExtractionError> {
        request.url.query_pairs_mut().append_pair("a_bogus", "signed");
        request.options = request.options.header("X-Signed-For", request.platform);
        Ok(request)
    }

    fn name(&self) -> &'static str {
        "header"
    }
}

#[tokio::test]
async fn test_signer_applied_to_metadata_requests() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/aweme/v1/web/aweme/detail/"))
        .and(query_param("a_bogus", "signed"))
        .and(header("X-Signed-For", "douyin"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "status_code": 0, "aweme_detail": video_aweme("7301") })),
        )
        .expect(1)
        .mount(&server)
        .await;

    let platforms = crate::config::PlatformConfig {
        douyin_api_base: server.uri(),
        ..Default::default()
    };
    let registry =
        ExtractorRegistry::with_defaults(single_shot_fetcher(), &platforms, Arc::new(HeaderSigner));

    let item = registry.resolve(None, "7301").await.unwrap();
    assert_eq!(item.id, "7301");
}

struct ExampleStrategy;

#[async_trait]
impl PlatformStrategy for ExampleStrategy {
    fn name(&self) -> &'static str {
        "example"
    }

    fn matches(&self, input: &NormalizedInput) -> bool {
        input.host_is("example.com")
    }

    fn identify(&self, input: &NormalizedInput) -> Option<ItemId> {
        input.query_param("id").map(ItemId::from)
    }

    async fn resolve(
        &self,
        input: &NormalizedInput,
        _fetcher: &Fetcher,
    ) -> Result<ResolvedItem, ExtractionError> {
        Ok(ResolvedItem {
            id: self.identify(input).unwrap(),
            assets: Vec::new(),
            metadata: Default::default(),
        })
    }
}

#[tokio::test]
async fn test_custom_strategy_registration() {
    let mut registry = registry_for("https://www.douyin.com", "https://www.tiktok.com");
    registry.register(Arc::new(ExampleStrategy));

    assert_eq!(registry.strategy_names(), ["douyin", "tiktok", "example"]);

    let item = registry
        .resolve(None, "https://example.com/watch?id=abc")
        .await
        .unwrap();
    assert_eq!(item.id, "abc");
    assert_eq!(item.status, ItemStatus::Resolved);
}

#[tokio::test]
async fn test_ids_unusable_as_directories_are_rejected() {
    let mut registry = registry_for("https://www.douyin.com", "https://www.tiktok.com");
    registry.register(Arc::new(ExampleStrategy));

    for link in [
        "https://example.com/watch?id=..",
        "https://example.com/watch?id=../escaped",
        "https://example.com/watch?id=a%2Fb",
    ] {
        let err = registry.resolve(None, link).await.unwrap_err();
        assert!(
            matches!(err, ExtractionError::SchemaMismatch { platform: "example", .. }),
            "{link}: {err:?}"
        );
    }
}

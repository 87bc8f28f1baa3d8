use super::video_aweme;
use crate::error::ExtractionError;
use crate::extractor::douyin::parse_detail;
use crate::extractor::{DouyinStrategy, NoopSigner, NormalizedInput, PlatformStrategy};
use crate::types::{ItemId, MediaType};
use serde_json::json;
use std::sync::Arc;

fn body(value: serde_json::Value) -> Vec<u8> {
    serde_json::to_vec(&value).unwrap()
}

fn strategy() -> DouyinStrategy {
    DouyinStrategy::new("https://www.douyin.com", None, Arc::new(NoopSigner))
}

fn identify(raw: &str) -> Option<ItemId> {
    strategy().identify(&NormalizedInput::parse(raw).unwrap())
}

#[test]
fn test_identify_from_links() {
    assert_eq!(
        identify("https://www.douyin.com/video/7301234567890123456").unwrap(),
        "7301234567890123456"
    );
    assert_eq!(
        identify("https://www.douyin.com/note/7300000000000000001").unwrap(),
        "7300000000000000001"
    );
    assert_eq!(
        identify("https://www.iesdouyin.com/share/video/7301/?region=CN").unwrap(),
        "7301"
    );
    assert_eq!(
        identify("https://www.douyin.com/user/MS4wLjAB?modal_id=7302").unwrap(),
        "7302"
    );
    assert_eq!(identify("7301234567890123456").unwrap(), "7301234567890123456");
}

#[test]
fn test_short_link_needs_network() {
    assert_eq!(identify("https://v.douyin.com/iRNBho6u/"), None);
    assert_eq!(identify("https://www.douyin.com/user/MS4wLjAB"), None);
}

#[test]
fn test_matches_hosts_and_bare_ids() {
    let s = strategy();
    for raw in ["https://v.douyin.com/x/", "https://www.iesdouyin.com/share/video/1/", "123456"] {
        assert!(s.matches(&NormalizedInput::parse(raw).unwrap()), "{raw}");
    }
    assert!(!s.matches(&NormalizedInput::parse("https://www.tiktok.com/@a/video/1").unwrap()));
}

#[test]
fn test_current_shape() {
    let item = parse_detail(
        &body(json!({ "status_code": 0, "aweme_detail": video_aweme("7301") })),
        &ItemId::from("7301"),
    )
    .unwrap();

    assert_eq!(item.id, "7301");
    assert_eq!(item.metadata.platform, "douyin");
    let kinds: Vec<_> = item.assets.iter().map(|a| a.media_type).collect();
    assert_eq!(kinds, [MediaType::Video, MediaType::Audio, MediaType::Cover]);
    assert_eq!(item.assets[0].expected_size, Some(4096));
}

#[test]
fn test_legacy_shape() {
    let item = parse_detail(
        &body(json!({ "status_code": 0, "item_list": [video_aweme("7301")] })),
        &ItemId::from("7301"),
    )
    .unwrap();
    assert_eq!(item.id, "7301");
    assert_eq!(item.assets[0].url, "https://cdn.example/7301.mp4");
}

#[test]
fn test_current_shape_with_other_item_is_not_found() {
    let err = parse_detail(
        &body(json!({ "status_code": 0, "aweme_detail": video_aweme("9999") })),
        &ItemId::from("7301"),
    )
    .unwrap_err();
    assert!(matches!(err, ExtractionError::NotFound { .. }), "{err:?}");

    let err = parse_detail(
        &body(json!({ "status_code": 0, "aweme_detail": video_aweme("..") })),
        &ItemId::from("7301"),
    )
    .unwrap_err();
    assert!(matches!(err, ExtractionError::NotFound { .. }), "{err:?}");
}

#[test]
fn test_legacy_shape_with_other_item_is_not_found() {
    let err = parse_detail(
        &body(json!({ "status_code": 0, "item_list": [video_aweme("9999")] })),
        &ItemId::from("7301"),
    )
    .unwrap_err();
    assert!(matches!(err, ExtractionError::NotFound { .. }), "{err:?}");

    let err = parse_detail(
        &body(json!({ "status_code": 0, "item_list": [] })),
        &ItemId::from("7301"),
    )
    .unwrap_err();
    assert!(matches!(err, ExtractionError::NotFound { .. }), "{err:?}");
}

#[test]
fn test_null_detail_is_not_found_with_filter_reason() {
    let err = parse_detail(
        &body(json!({
            "status_code": 0,
            "aweme_detail": null,
            "filter_detail": { "aweme_id": "7301", "filter_reason": "status_deleted", "detail_msg": "" }
        })),
        &ItemId::from("7301"),
    )
    .unwrap_err();

    match err {
        ExtractionError::NotFound { id, reason } => {
            assert_eq!(id, "7301");
            assert_eq!(reason, "status_deleted");
        }
        other => panic!("expected NotFound, got {other:?}"),
    }
}

#[test]
fn test_throttle_signals_in_200_body() {
    for payload in [
        b"".to_vec(),
        b"  \n".to_vec(),
        body(json!({ "status_code": 2154, "status_msg": "请求太频繁，请稍后再试" })),
        b"<html><title>Verify</title><div id=\"captcha\"></div></html>".to_vec(),
    ] {
        let err = parse_detail(&payload, &ItemId::from("7301")).unwrap_err();
        assert!(
            matches!(err, ExtractionError::RateLimited { platform: "douyin", .. }),
            "{:?} gave {err:?}",
            String::from_utf8_lossy(&payload)
        );
    }
}

#[test]
fn test_gone_status_is_not_found() {
    let err = parse_detail(
        &body(json!({ "status_code": 2053, "status_msg": "作品已删除" })),
        &ItemId::from("7301"),
    )
    .unwrap_err();
    assert!(matches!(err, ExtractionError::NotFound { .. }), "{err:?}");
}

#[test]
fn test_unknown_shapes_are_never_guessed() {
    for payload in [
        body(json!({ "status_code": 0, "data": { "aweme": video_aweme("7301") } })),
        body(json!({ "status_code": 0, "item_list": { "0": video_aweme("7301") } })),
        body(json!({ "status_code": 9, "status_msg": "something new" })),
        b"<html>hello</html>".to_vec(),
    ] {
        let err = parse_detail(&payload, &ItemId::from("7301")).unwrap_err();
        assert!(
            matches!(err, ExtractionError::SchemaMismatch { platform: "douyin", .. }),
            "{:?} gave {err:?}",
            String::from_utf8_lossy(&payload)
        );
    }
}

use super::*;

#[tokio::test]
async fn test_cancelled_before_first_asset_places_nothing() {
    let h = harness(true).await;
    let server = MockServer::start().await;
    serve_assets(&server).await;
    let item = resolved_item(&server);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = h
        .sink
        .commit(&item, CommitOptions::default(), &cancel)
        .await
        .unwrap_err();

    assert!(matches!(err, SinkError::Cancelled), "{err:?}");
    assert_eq!(request_count(&server).await, 0);
    assert!(!h.root.join("7301").exists());
    assert!(!h.store.has_record(&item.id).await.unwrap());
}

#[tokio::test]
async fn test_cancel_between_assets_keeps_staged_files() {
    let h = harness(true).await;
    let server = MockServer::start().await;
    serve_assets(&server).await;
    let item = resolved_item(&server);
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    let err = h
        .sink
        .commit_with_progress(&item, CommitOptions::default(), &cancel, move |index, _| {
            if index == 0 {
                trigger.cancel();
            }
        })
        .await
        .unwrap_err();

    assert!(matches!(err, SinkError::Cancelled), "{err:?}");
    assert_eq!(request_count(&server).await, 1, "second asset never requested");
    assert!(!h.root.join("7301").exists());
    assert!(!h.store.has_record(&item.id).await.unwrap());
}

#[tokio::test]
async fn test_checksum_mismatch_places_nothing() {
    let h = harness(true).await;
    let server = MockServer::start().await;
    serve_assets(&server).await;
    let mut item = resolved_item(&server);
    item.assets[1].checksum = Some(Checksum::Md5("0".repeat(32)));

    let err = h
        .sink
        .commit(&item, CommitOptions::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SinkError::ChecksumMismatch { .. }), "{err:?}");
    assert!(!h.root.join("7301").exists());
    assert!(!h.store.has_record(&item.id).await.unwrap());
    assert!(
        !h.root.join(".staging").join("7301").join("music.mp3.part").exists(),
        "corrupt body is discarded"
    );
}

#[tokio::test]
async fn test_matching_checksum_commits() {
    let h = harness(false).await;
    let server = MockServer::start().await;
    serve_assets(&server).await;
    let mut item = resolved_item(&server);
    item.assets[1].checksum = Some(Checksum::Md5(format!("{:x}", md5::compute(MUSIC))));

    let outcome = h
        .sink
        .commit(&item, CommitOptions::default(), &CancellationToken::new())
        .await
        .unwrap();
    assert!(matches!(outcome, CommitOutcome::Committed(_)));
}

#[tokio::test]
async fn test_partial_file_resumed_with_range() {
    let h = harness(false).await;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v/7301.mp4"))
        .and(header("Range", "bytes=6-"))
        .respond_with(
            ResponseTemplate::new(206)
                .insert_header("Content-Range", format!("bytes 6-15/{}", VIDEO.len()))
                .set_body_bytes(&VIDEO[6..]),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/m/7301.mp3"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(MUSIC))
        .mount(&server)
        .await;

    let item = resolved_item(&server);
    let staging = h.root.join(".staging").join("7301");
    tokio::fs::create_dir_all(&staging).await.unwrap();
    tokio::fs::write(staging.join("video.mp4.part"), &VIDEO[..6]).await.unwrap();

    h.sink
        .commit(&item, CommitOptions::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(tokio::fs::read(h.root.join("7301").join("video.mp4")).await.unwrap(), VIDEO);
}

#[tokio::test]
async fn test_forbidden_asset_surfaces_fetch_error() {
    let h = harness(false).await;
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;
    let item = resolved_item(&server);

    let err = h
        .sink
        .commit(&item, CommitOptions::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SinkError::Fetch(FetchError::Forbidden { status: 403, .. })), "{err:?}");
    assert!(!h.store.has_record(&item.id).await.unwrap());
}

#[tokio::test]
async fn test_unsafe_ids_never_touch_the_filesystem() {
    let h = harness(false).await;
    let server = MockServer::start().await;
    serve_assets(&server).await;

    h.sink
        .commit(&resolved_item(&server), CommitOptions::default(), &CancellationToken::new())
        .await
        .unwrap();
    let committed = h.root.join("7301").join("video.mp4");
    assert!(committed.exists());

    for id in ["..", "../escaped", "https://v.douyin.com/x/../../"] {
        let mut item = resolved_item(&server);
        item.id = ItemId::from(id);

        let err = h
            .sink
            .commit(&item, CommitOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SinkError::Io { .. }), "{id}: {err:?}");

        h.sink.discard_staging(&item).await;
        assert!(committed.exists(), "{id} removed a committed item");
    }

    assert!(!h.root.parent().unwrap().join("escaped").exists());
    assert_eq!(request_count(&server).await, 2, "only the first commit downloads");
}

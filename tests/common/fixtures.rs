//! Mock platform responses and media bodies

use serde_json::{Value, json};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

/// Douyin detail endpoint path
pub const DETAIL_PATH: &str = "/aweme/v1/web/aweme/detail/";

/// Body served for every video
pub const VIDEO_BODY: &[u8] = b"\x00\x00\x00\x18ftypmp42 fake video payload";

/// Body served for every music track
pub const MUSIC_BODY: &[u8] = b"ID3 fake music payload";

/// Path a video for `id` is served from
pub fn video_path(id: &str) -> String {
    format!("/media/{id}/video.mp4")
}

/// Path a music track for `id` is served from
pub fn music_path(id: &str) -> String {
    format!("/media/{id}/music.mp3")
}

/// Aweme object with a video and a music track hosted on `server`
pub fn aweme(server: &MockServer, id: &str) -> Value {
    json!({
        "aweme_id": id,
        "desc": format!("clip {id}"),
        "create_time": 1_700_000_000,
        "author": { "nickname": "someone" },
        "video": {
            "play_addr": {
                "url_list": [format!("{}{}", server.uri(), video_path(id))],
                "data_size": VIDEO_BODY.len()
            }
        },
        "music": { "play_url": { "url_list": [format!("{}{}", server.uri(), music_path(id))] } }
    })
}

/// Successful detail response for `id`
pub fn detail_ok(server: &MockServer, id: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .set_body_json(json!({ "status_code": 0, "aweme_detail": aweme(server, id) }))
}

/// Mount the detail endpoint for `id`
pub async fn mount_detail(server: &MockServer, id: &str) {
    Mock::given(method("GET"))
        .and(path(DETAIL_PATH))
        .and(query_param("aweme_id", id))
        .respond_with(detail_ok(server, id))
        .mount(server)
        .await;
}

/// Mount the video and music files for `id`
pub async fn mount_media(server: &MockServer, id: &str) {
    Mock::given(method("GET"))
        .and(path(video_path(id)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(VIDEO_BODY))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(music_path(id)))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(MUSIC_BODY))
        .mount(server)
        .await;
}

/// Mount everything a successful download of `id` needs
pub async fn mount_item(server: &MockServer, id: &str) {
    mount_detail(server, id).await;
    mount_media(server, id).await;
}

/// Requests the server received for `request_path`
pub async fn requests_to(server: &MockServer, request_path: &str) -> Vec<Request> {
    server
        .received_requests()
        .await
        .unwrap_or_default()
        .into_iter()
        .filter(|r| r.url.path() == request_path)
        .collect()
}

/// Responder that records when each request arrived
#[derive(Clone)]
pub struct ArrivalRecorder {
    arrivals: Arc<Mutex<Vec<Instant>>>,
    response: ResponseTemplate,
}

impl ArrivalRecorder {
    /// Record arrivals and answer with `response`
    pub fn new(response: ResponseTemplate) -> Self {
        Self {
            arrivals: Arc::new(Mutex::new(Vec::new())),
            response,
        }
    }

    /// Arrival instants so far, in order
    pub fn arrivals(&self) -> Vec<Instant> {
        let mut arrivals = self.arrivals.lock().map(|a| a.clone()).unwrap_or_default();
        arrivals.sort();
        arrivals
    }
}

impl Respond for ArrivalRecorder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        if let Ok(mut arrivals) = self.arrivals.lock() {
            arrivals.push(Instant::now());
        }
        self.response.clone()
    }
}

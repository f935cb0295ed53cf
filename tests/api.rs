use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use restyle::backend::{ChatTurn, GenerativeBackend};
use restyle::error::BackendError;
use restyle::image_data::ImagePayload;
use restyle::routes::{router, AppState};

const ANALYSIS_JSON: &str = r##"{
    "colors": ["#aabbcc"],
    "style": "flat illustration",
    "layout": "centered",
    "layoutDetail": "subject dead center",
    "view": "front",
    "viewDetail": "slightly from above",
    "objects": ["teapot"],
    "prompt": "a teapot in flat illustration style"
}"##;

/// Scripted responses per call shape. Errors are constructed fresh on
/// every call so the script itself stays cloneable. When `gate` is set,
/// the structured call parks until the test releases it.
#[derive(Clone, Default)]
struct MockBackend {
    structured_reply: Option<String>,
    structured_fails: bool,
    text_reply: Option<String>,
    text_fails: bool,
    chat_fails: bool,
    gate: Option<Arc<tokio::sync::Notify>>,
}

impl MockBackend {
    fn analyzing_ok() -> Self {
        Self {
            structured_reply: Some(ANALYSIS_JSON.to_string()),
            text_reply: Some("refined".to_string()),
            ..Self::default()
        }
    }
}

#[async_trait]
impl GenerativeBackend for MockBackend {
    async fn generate_structured(
        &self,
        _: &str,
        _: &ImagePayload,
        _: &Value,
    ) -> Result<Option<String>, BackendError> {
        if let Some(gate) = &self.gate {
            gate.notified().await;
        }
        if self.structured_fails {
            return Err(BackendError::Transport("mock outage".into()));
        }
        Ok(self.structured_reply.clone())
    }

    async fn generate_text(
        &self,
        _: &str,
        _: Option<&ImagePayload>,
    ) -> Result<Option<String>, BackendError> {
        if self.text_fails {
            return Err(BackendError::Transport("mock outage".into()));
        }
        Ok(self.text_reply.clone())
    }

    async fn generate_image(
        &self,
        _: &str,
        _: Option<&ImagePayload>,
    ) -> Result<Option<ImagePayload>, BackendError> {
        Ok(Some(ImagePayload::new("image/png", "cmVtaXhlZA==")))
    }

    async fn chat(&self, _: &str, _: &[ChatTurn], _: &str) -> Result<String, BackendError> {
        if self.chat_fails {
            return Err(BackendError::Transport("mock outage".into()));
        }
        Ok("use complementary colors".to_string())
    }
}

fn app(backend: MockBackend) -> Router {
    router(Arc::new(AppState::new(Arc::new(backend))))
}

fn png_data_uri() -> String {
    let image = image::RgbImage::from_pixel(1, 1, image::Rgb([200, 40, 40]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(image)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageOutputFormat::Png)
        .unwrap();
    format!("data:image/png;base64,{}", BASE64.encode(bytes))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        })
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn create_session(app: &Router) -> String {
    let (status, body) = send(app, "POST", "/api/session", None).await;
    assert_eq!(status, StatusCode::OK);
    body["id"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn new_session_starts_at_upload_with_the_welcome_message() {
    let app = app(MockBackend::analyzing_ok());
    let (status, body) = send(&app, "POST", "/api/session", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step"], "upload");
    assert_eq!(body["image"], Value::Null);
    assert_eq!(body["analysis"], Value::Null);
    assert_eq!(body["chat"].as_array().unwrap().len(), 1);
    assert_eq!(body["chat"][0]["role"], "model");
}

#[tokio::test]
async fn successful_upload_reaches_results_and_seeds_the_description() {
    let app = app(MockBackend::analyzing_ok());
    let id = create_session(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/session/{id}/image"),
        Some(json!({ "image": png_data_uri() })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step"], "results");
    assert_eq!(body["analysis"]["style"], "flat illustration");
    assert_eq!(body["description"], "a teapot in flat illustration style");
    assert!(body["image"].as_str().unwrap().starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn empty_analysis_reverts_the_session_to_upload() {
    let app = app(MockBackend {
        structured_reply: None,
        ..MockBackend::default()
    });
    let id = create_session(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/session/{id}/image"),
        Some(json!({ "image": png_data_uri() })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body["error"].as_str().unwrap().contains("analyze"));

    let (_, body) = send(&app, "GET", &format!("/api/session/{id}"), None).await;
    assert_eq!(body["step"], "upload");
    assert_eq!(body["image"], Value::Null);
    assert_eq!(body["analysis"], Value::Null);
}

#[tokio::test]
async fn non_json_analysis_is_the_same_generic_failure() {
    let app = app(MockBackend {
        structured_reply: Some("definitely not json".into()),
        ..MockBackend::default()
    });
    let id = create_session(&app).await;

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/session/{id}/image"),
        Some(json!({ "image": png_data_uri() })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
}

#[tokio::test]
async fn unreadable_payload_is_rejected_before_any_remote_call() {
    let app = app(MockBackend::analyzing_ok());
    let id = create_session(&app).await;

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/session/{id}/image"),
        Some(json!({ "image": "data:image/png;base64,!!!not-base64!!!" })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = send(&app, "GET", &format!("/api/session/{id}"), None).await;
    assert_eq!(body["step"], "upload");
}

#[tokio::test]
async fn refinement_replaces_the_description() {
    let app = app(MockBackend::analyzing_ok());
    let id = create_session(&app).await;
    send(
        &app,
        "POST",
        &format!("/api/session/{id}/image"),
        Some(json!({ "image": png_data_uri() })),
    )
    .await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/session/{id}/refine"),
        Some(json!({ "instruction": "shorter" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["description"], "refined");

    let (_, body) = send(&app, "GET", &format!("/api/session/{id}"), None).await;
    assert_eq!(body["description"], "refined");
}

#[tokio::test]
async fn failed_refinement_leaves_the_description_untouched() {
    let app = app(MockBackend {
        text_fails: true,
        ..MockBackend::analyzing_ok()
    });
    let id = create_session(&app).await;
    send(
        &app,
        "POST",
        &format!("/api/session/{id}/image"),
        Some(json!({ "image": png_data_uri() })),
    )
    .await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/session/{id}/refine"),
        Some(json!({ "instruction": "shorter" })),
    )
    .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body["error"].as_str().unwrap().contains("unchanged"));

    let (_, body) = send(&app, "GET", &format!("/api/session/{id}"), None).await;
    assert_eq!(body["description"], "a teapot in flat illustration style");
    assert_eq!(body["step"], "results");
}

#[tokio::test]
async fn refinement_is_rejected_outside_results() {
    let app = app(MockBackend::analyzing_ok());
    let id = create_session(&app).await;

    let (status, _) = send(
        &app,
        "POST",
        &format!("/api/session/{id}/refine"),
        Some(json!({ "instruction": "shorter" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn preset_filters_run_through_the_same_path() {
    let app = app(MockBackend::analyzing_ok());
    let id = create_session(&app).await;
    send(
        &app,
        "POST",
        &format!("/api/session/{id}/image"),
        Some(json!({ "image": png_data_uri() })),
    )
    .await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/session/{id}/filter"),
        Some(json!({ "filter": "noir" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["description"], "refined");
}

#[tokio::test]
async fn remix_replaces_the_session_image() {
    let app = app(MockBackend::analyzing_ok());
    let id = create_session(&app).await;
    send(
        &app,
        "POST",
        &format!("/api/session/{id}/image"),
        Some(json!({ "image": png_data_uri() })),
    )
    .await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/session/{id}/remix"),
        Some(json!({ "style": "watercolor" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step"], "results");
    assert_eq!(body["image"], "data:image/png;base64,cmVtaXhlZA==");
}

#[tokio::test]
async fn chat_turn_appends_user_and_reply() {
    let app = app(MockBackend::analyzing_ok());
    let id = create_session(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/session/{id}/chat"),
        Some(json!({ "message": "which palette suits a bakery?" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[1]["role"], "user");
    assert_eq!(messages[2]["role"], "model");
    assert_eq!(messages[2]["text"], "use complementary colors");
}

#[tokio::test]
async fn failed_chat_turn_still_gets_a_visible_reply() {
    let app = app(MockBackend {
        chat_fails: true,
        ..MockBackend::default()
    });
    let id = create_session(&app).await;

    let (status, body) = send(
        &app,
        "POST",
        &format!("/api/session/{id}/chat"),
        Some(json!({ "message": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[2]["role"], "model");
    assert_eq!(messages[2]["synthetic"], true);
}

#[tokio::test]
async fn reset_returns_a_pristine_upload_state() {
    let app = app(MockBackend::analyzing_ok());
    let id = create_session(&app).await;
    send(
        &app,
        "POST",
        &format!("/api/session/{id}/image"),
        Some(json!({ "image": png_data_uri() })),
    )
    .await;

    let (status, body) = send(&app, "POST", &format!("/api/session/{id}/reset"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step"], "upload");
    assert_eq!(body["image"], Value::Null);
    assert_eq!(body["analysis"], Value::Null);
    assert_eq!(body["description"], "");
}

#[tokio::test]
async fn reset_during_analysis_drops_the_late_result() {
    let gate = Arc::new(tokio::sync::Notify::new());
    let app = app(MockBackend {
        gate: Some(gate.clone()),
        ..MockBackend::analyzing_ok()
    });
    let id = create_session(&app).await;

    let upload_app = app.clone();
    let upload_id = id.clone();
    let upload = tokio::spawn(async move {
        send(
            &upload_app,
            "POST",
            &format!("/api/session/{upload_id}/image"),
            Some(json!({ "image": png_data_uri() })),
        )
        .await
    });

    // Wait until the upload has entered the analyzing step and is
    // parked inside the remote call.
    loop {
        let (_, body) = send(&app, "GET", &format!("/api/session/{id}"), None).await;
        if body["step"] == "analyzing" {
            break;
        }
        tokio::task::yield_now().await;
    }

    let (status, body) = send(&app, "POST", &format!("/api/session/{id}/reset"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["step"], "upload");

    // Release the parked analysis; its result is now stale.
    gate.notify_one();
    let (status, _) = upload.await.unwrap();
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, body) = send(&app, "GET", &format!("/api/session/{id}"), None).await;
    assert_eq!(body["step"], "upload");
    assert_eq!(body["image"], Value::Null);
    assert_eq!(body["analysis"], Value::Null);
    assert_eq!(body["description"], "");
}

#[tokio::test]
async fn export_summarizes_the_analysis_and_description() {
    let app = app(MockBackend::analyzing_ok());
    let id = create_session(&app).await;
    send(
        &app,
        "POST",
        &format!("/api/session/{id}/image"),
        Some(json!({ "image": png_data_uri() })),
    )
    .await;

    let (status, body) = send(&app, "GET", &format!("/api/session/{id}/export"), None).await;
    assert_eq!(status, StatusCode::OK);
    let summary = body["summary"].as_str().unwrap();
    assert!(summary.contains("flat illustration"));
    assert!(summary.contains("#aabbcc"));
    assert!(summary.contains("a teapot in flat illustration style"));
    assert!(summary.contains("Layout detail: subject dead center"));
    assert!(summary.contains("View detail: slightly from above"));
    assert!(body["image"].as_str().unwrap().starts_with("data:"));
}

#[tokio::test]
async fn unknown_session_is_a_404() {
    let app = app(MockBackend::analyzing_ok());
    let (status, _) = send(
        &app,
        "GET",
        &format!("/api/session/{}", uuid::Uuid::new_v4()),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

//! `BitriseClient` against a loopback server serving canned responses.

use matrix_trigger_core::api::{AbortRequest, BuildApi, TriggerParams};
use matrix_trigger_core::{
    ApiError, BitriseClient, ChatMessage, ClientConfig, Notifier, NotifyError, SlackNotifier,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::oneshot;

/// Serve one request with `status` and `body`; yields the raw request text.
async fn serve_once(status: &str, body: &str) -> (String, oneshot::Receiver<String>) {
    serve_raw(format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
        body.len()
    ))
    .await
}

/// Serve one request with a verbatim response, then close the connection.
async fn serve_raw(response: String) -> (String, oneshot::Receiver<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        socket.write_all(response.as_bytes()).await.unwrap();
        socket.shutdown().await.ok();
        let _ = tx.send(request);
    });

    (base, rx)
}

async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = socket.read(&mut chunk).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);

        let text = String::from_utf8_lossy(&buf);
        if let Some(header_end) = text.find("\r\n\r\n") {
            let content_length = text[..header_end]
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())
                        .flatten()
                })
                .unwrap_or(0);
            if buf.len() >= header_end + 4 + content_length {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

fn client(base: &str) -> BitriseClient {
    BitriseClient::new(ClientConfig::new("api-secret").with_urls(base, &format!("{base}/v0.1")))
        .unwrap()
}

fn params() -> TriggerParams {
    let key = matrix_trigger_core::BuildRequestKey::new(
        &matrix_trigger_core::SharedParams::new("stack", "standard", "primary"),
        [("API".to_string(), "30".to_string())].into_iter().collect(),
    );
    key.trigger_params(&Default::default(), "trigger-secret")
}

#[tokio::test]
async fn trigger_posts_params_and_accepts_ok() {
    let (base, request) = serve_once(
        "201 Created",
        r#"{"status":"ok","slug":"app-1","build_slug":"build-9","message":"webhook processed"}"#,
    )
    .await;

    let triggered = client(&base).trigger_build("app-1", &params()).await.unwrap();
    assert_eq!(triggered.slug, "app-1");
    assert_eq!(triggered.build_slug, "build-9");

    let request = request.await.unwrap();
    assert!(request.starts_with("POST /app/app-1/build/start.json HTTP/1.1"));
    assert!(request.contains("\"build_trigger_token\":\"trigger-secret\""));
    assert!(request.contains("\"mapped_to\":\"API\""));
    assert!(request.contains("\"workflow_id\":\"primary\""));
}

#[tokio::test]
async fn trigger_non_created_keeps_raw_body() {
    let body = r#"{"status":"error","message":"Invalid build trigger token"}"#;
    let (base, _request) = serve_once("401 Unauthorized", body).await;

    let err = client(&base).trigger_build("app-1", &params()).await.unwrap_err();
    match err {
        ApiError::UnexpectedStatus { status, body: raw } => {
            assert!(status.starts_with("401"));
            assert_eq!(raw, body);
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn status_sends_token_and_decodes_snapshot() {
    let (base, request) = serve_once(
        "200 OK",
        r#"{"data":{"status":1,"status_text":"success","slug":"build-9","build_number":42,
            "triggered_at":"2023-05-01T10:00:00Z","started_on_worker_at":"2023-05-01T10:01:00Z",
            "finished_at":"2023-05-01T10:11:00Z","is_on_hold":false,
            "original_build_params":{"branch":"main","workflow_id":"primary"}}}"#,
    )
    .await;

    let snapshot = client(&base).build_status("app-1", "build-9").await.unwrap();
    assert_eq!(snapshot.status_text, "success");
    assert_eq!(snapshot.build_number, 42);
    assert_eq!(snapshot.original_build_params.workflow_id.as_deref(), Some("primary"));
    assert_eq!(matrix_trigger_core::compute_duration(&snapshot), "10m0s");

    let request = request.await.unwrap().to_ascii_lowercase();
    assert!(request.starts_with("get /v0.1/apps/app-1/builds/build-9 http/1.1"));
    assert!(request.contains("authorization: token api-secret"));
}

#[tokio::test]
async fn status_error_code_is_unexpected_status() {
    let (base, _request) = serve_once("404 Not Found", r#"{"message":"Not Found"}"#).await;

    let err = client(&base).build_status("app-1", "missing").await.unwrap_err();
    assert!(matches!(err, ApiError::UnexpectedStatus { ref status, .. } if status.starts_with("404")));
}

#[tokio::test]
async fn abort_posts_reason() {
    let (base, request) = serve_once("200 OK", r#"{"status":"ok"}"#).await;

    let ack = client(&base)
        .abort_build("app-1", "build-9", &AbortRequest::with_reason("hung"))
        .await
        .unwrap();
    assert_eq!(ack.status, "ok");

    let request = request.await.unwrap();
    assert!(request.starts_with("POST /v0.1/apps/app-1/builds/build-9/abort HTTP/1.1"));
    assert!(request.ends_with(r#"{"abort_reason":"hung"}"#));
}

#[tokio::test]
async fn unreadable_error_body_keeps_the_status_line() {
    let (base, _request) = serve_raw(
        "HTTP/1.1 502 Bad Gateway\r\nContent-Length: 64\r\nConnection: close\r\n\r\n{\"partial\"".to_string(),
    )
    .await;

    let err = client(&base).trigger_build("app-1", &params()).await.unwrap_err();
    match err {
        ApiError::UnexpectedStatus { status, body } => {
            assert!(status.starts_with("502"));
            assert!(body.starts_with("failed to read response body"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn webhook_post_omits_empty_fields() {
    let (base, request) = serve_once("200 OK", "ok").await;
    let webhook = format!("{base}/services/T000/B000/XXXX");

    SlackNotifier::new(Some(&webhook), None)
        .post(&ChatMessage::new("#ci", "build hung").with_username("matrix-trigger"))
        .await
        .unwrap();

    let request = request.await.unwrap();
    assert!(request.starts_with("POST /services/T000/B000/XXXX HTTP/1.1"));
    assert!(!request.to_ascii_lowercase().contains("authorization:"));
    let body = request.split("\r\n\r\n").nth(1).unwrap();
    let json: serde_json::Value = serde_json::from_str(body).unwrap();
    assert_eq!(
        json,
        serde_json::json!({ "channel": "#ci", "text": "build hung", "username": "matrix-trigger" })
    );
}

#[tokio::test]
async fn notifier_sends_bearer_token() {
    let (base, request) = serve_once("200 OK", r#"{"ok":true}"#).await;

    SlackNotifier::new(Some(&format!("{base}/api/chat.postMessage")), Some("xoxb-secret"))
        .post(&ChatMessage::new("#ci", "hello"))
        .await
        .unwrap();

    let request = request.await.unwrap().to_ascii_lowercase();
    assert!(request.contains("authorization: bearer xoxb-secret"));
    assert!(request.contains("content-type: application/json; charset=utf-8"));
}

#[tokio::test]
async fn notifier_rejection_carries_status_and_body() {
    let (base, _request) = serve_once("500 Internal Server Error", "channel_not_found").await;

    let err = SlackNotifier::new(Some(&base), None)
        .post(&ChatMessage::new("#missing", "hello"))
        .await
        .unwrap_err();
    match err {
        NotifyError::Rejected { status, body } => {
            assert!(status.starts_with("500"));
            assert_eq!(body, "channel_not_found");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use agent_media::action::{ActionContext, ActionRequest, GenerateOptions};
use agent_media::backends::{FalProvider, RemoteApi, ReplicateProvider, RunpodProvider};
use agent_media::config::RemoteProviderConfig;
use agent_media::provider::MediaProvider;
use agent_media::result::{ErrorCode, MediaResult};

struct Reply {
    status: u16,
    content_type: &'static str,
    body: Vec<u8>,
}

impl Reply {
    fn json(status: u16, value: Value) -> Self {
        Self {
            status,
            content_type: "application/json",
            body: value.to_string().into_bytes(),
        }
    }

    fn text(status: u16, body: &str) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: body.as_bytes().to_vec(),
        }
    }

    fn image(body: &[u8]) -> Self {
        Self {
            status: 200,
            content_type: "image/webp",
            body: body.to_vec(),
        }
    }
}

type Route = Arc<dyn Fn(&str, &str) -> Reply + Send + Sync>;

fn route(f: impl Fn(&str, &str) -> Reply + Send + Sync + 'static) -> Route {
    Arc::new(f)
}

/// Serve canned replies on a loopback port. `routes` gets the base URL so
/// replies can point back at the same server.
async fn serve<F>(routes: F) -> String
where
    F: FnOnce(&str) -> Route,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let route = routes(&base);
    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let route = route.clone();
            tokio::spawn(async move {
                let Some((method, path)) = read_request(&mut stream).await else {
                    return;
                };
                let reply = route(&method, &path);
                let head = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    reply.status,
                    if reply.status < 400 { "OK" } else { "Error" },
                    reply.content_type,
                    reply.body.len()
                );
                let _ = stream.write_all(head.as_bytes()).await;
                let _ = stream.write_all(&reply.body).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    base
}

/// Method and path of one request, after draining its body.
async fn read_request(stream: &mut TcpStream) -> Option<(String, String)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    let header_end = loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);
    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let mut request_line = head.split_whitespace();
    Some((request_line.next()?.to_string(), request_line.next()?.to_string()))
}

fn api(label: &'static str, base_url: &str, timeout_secs: u64) -> RemoteApi {
    RemoteApi::new(
        label,
        RemoteProviderConfig {
            base_url: base_url.to_string(),
            timeout_secs,
            poll_interval_ms: 20,
        },
    )
    .unwrap()
}

fn env(var: &str) -> Arc<HashMap<String, String>> {
    Arc::new(HashMap::from([(var.to_string(), "test-key".to_string())]))
}

fn generate() -> ActionRequest {
    ActionRequest::Generate(GenerateOptions {
        prompt: "a lighthouse at dusk".to_string(),
        width: None,
        height: None,
        count: 1,
        model: None,
        seed: None,
    })
}

fn error_of(result: &MediaResult) -> (String, String) {
    let value: Value = serde_json::from_str(&result.to_json_pretty()).unwrap();
    (
        value["error"]["code"].as_str().unwrap_or_default().to_string(),
        value["error"]["message"].as_str().unwrap_or_default().to_string(),
    )
}

fn replicate(base: &str, timeout_secs: u64) -> ReplicateProvider {
    ReplicateProvider::new(api("Replicate", base, timeout_secs), env("REPLICATE_API_TOKEN"))
}

async fn run(provider: &dyn MediaProvider, out: &Path) -> MediaResult {
    provider.execute(&generate(), &ActionContext::new(out)).await
}

#[tokio::test]
async fn test_rejected_request_is_api_error_with_status_and_body() {
    let base = serve(|_| route(|_, _| Reply::text(422, "prompt was flagged"))).await;
    let dir = tempfile::tempdir().unwrap();

    let result = run(&replicate(&base, 5), dir.path()).await;
    assert_eq!(result.error_code(), Some(ErrorCode::ApiError));
    assert_eq!(error_of(&result).1, "Replicate API error: 422 - prompt was flagged");

    let fal = FalProvider::new(api("Fal", &base, 5), env("FAL_API_KEY"));
    let result = run(&fal, dir.path()).await;
    assert_eq!(error_of(&result), ("API_ERROR".to_string(), "Fal API error: 422 - prompt was flagged".to_string()));
}

#[tokio::test]
async fn test_replicate_polls_until_succeeded_and_saves_output() {
    let polls = Arc::new(AtomicUsize::new(0));
    let seen = polls.clone();
    let base = serve(move |base| {
        let base = base.to_string();
        route(move |method, path| match (method, path) {
            ("POST", "/models/black-forest-labs/flux-2-dev/predictions") => Reply::json(
                201,
                json!({"id": "p1", "status": "starting", "urls": {"get": format!("{}/predictions/p1", base)}}),
            ),
            ("GET", "/predictions/p1") => {
                let status = if seen.fetch_add(1, Ordering::SeqCst) < 2 { "processing" } else { "succeeded" };
                Reply::json(
                    200,
                    json!({
                        "status": status,
                        "output": [format!("{}/files/out.webp", base)],
                        "urls": {"get": format!("{}/predictions/p1", base)}
                    }),
                )
            }
            ("GET", "/files/out.webp") => Reply::image(b"RIFF-webp-bytes"),
            _ => Reply::text(404, "not found"),
        })
    })
    .await;
    let dir = tempfile::tempdir().unwrap();

    let result = run(&replicate(&base, 5), dir.path()).await;
    assert!(result.is_ok(), "{}", result.to_json_pretty());
    assert_eq!(result.provider(), Some("replicate"));
    assert_eq!(polls.load(Ordering::SeqCst), 3);

    let path = result.output_path().unwrap();
    assert_eq!(path.extension().and_then(|e| e.to_str()), Some("webp"));
    assert_eq!(std::fs::read(path).unwrap(), b"RIFF-webp-bytes");
}

#[tokio::test]
async fn test_replicate_failed_prediction_is_provider_error() {
    let base = serve(|base| {
        let poll = format!("{}/predictions/p2", base);
        route(move |method, _| match method {
            "POST" => Reply::json(201, json!({"status": "starting", "urls": {"get": poll}})),
            _ => Reply::json(200, json!({"status": "failed", "error": "NSFW content detected"})),
        })
    })
    .await;
    let dir = tempfile::tempdir().unwrap();

    let result = run(&replicate(&base, 5), dir.path()).await;
    assert_eq!(
        error_of(&result),
        (
            "PROVIDER_ERROR".to_string(),
            "Replicate prediction failed: NSFW content detected".to_string()
        )
    );
}

#[tokio::test]
async fn test_replicate_gives_up_at_deadline() {
    let base = serve(|base| {
        let poll = format!("{}/predictions/p3", base);
        route(move |_, _| Reply::json(200, json!({"status": "processing", "urls": {"get": poll}})))
    })
    .await;
    let dir = tempfile::tempdir().unwrap();

    let result = run(&replicate(&base, 1), dir.path()).await;
    let (code, message) = error_of(&result);
    assert_eq!(code, "PROVIDER_ERROR");
    assert_eq!(message, "Replicate prediction did not finish within 1s");
}

#[tokio::test]
async fn test_failed_media_download_is_network_error() {
    let base = serve(|base| {
        let missing = format!("{}/files/gone.webp", base);
        route(move |method, _| match method {
            "POST" => Reply::json(201, json!({"status": "succeeded", "output": missing})),
            _ => Reply::text(404, "not found"),
        })
    })
    .await;
    let dir = tempfile::tempdir().unwrap();

    let result = run(&replicate(&base, 5), dir.path()).await;
    let (code, message) = error_of(&result);
    assert_eq!(code, "NETWORK_ERROR");
    assert!(message.contains("Failed to download generated media"), "{}", message);
}

#[tokio::test]
async fn test_runpod_polls_job_status() {
    let polls = Arc::new(AtomicUsize::new(0));
    let seen = polls.clone();
    let base = serve(move |base| {
        let base = base.to_string();
        route(move |method, path| {
            if method == "POST" && path.ends_with("/runsync") {
                Reply::json(200, json!({"id": "job-7", "status": "IN_PROGRESS"}))
            } else if path.ends_with("/status/job-7") {
                seen.fetch_add(1, Ordering::SeqCst);
                Reply::json(
                    200,
                    json!({"id": "job-7", "status": "COMPLETED", "output": {"image_url": format!("{}/files/img.png", base)}}),
                )
            } else if path == "/files/img.png" {
                Reply::image(b"png-bytes")
            } else {
                Reply::text(404, "not found")
            }
        })
    })
    .await;
    let dir = tempfile::tempdir().unwrap();

    let runpod = RunpodProvider::new(api("Runpod", &base, 5), env("RUNPOD_API_KEY"));
    let result = run(&runpod, dir.path()).await;
    assert!(result.is_ok(), "{}", result.to_json_pretty());
    assert_eq!(polls.load(Ordering::SeqCst), 1);
    assert_eq!(std::fs::read(result.output_path().unwrap()).unwrap(), b"png-bytes");
}

//! Functional tests for the Stable Diffusion backend against mocked HTTP services

use async_trait::async_trait;
use illust_gateway::backend::{GenerationBackend, ProcessSupervisor, ServiceState, StableDiffusionService};
use illust_gateway::clock::Clock;
use illust_gateway::config::{BackendConfig, GenerationConfig};
use illust_gateway::error::{AppError, Result};
use illust_gateway::response::upload::ImageHost;
use illust_gateway::response::{base64, ImagePublisher};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\n\x00\x00\x00\rIHDRfake";

#[derive(Default)]
struct FakeProcess {
    spawns: AtomicUsize,
    terminations: AtomicUsize,
    running: AtomicBool,
    fail_spawn: bool,
}

#[async_trait]
impl ProcessSupervisor for FakeProcess {
    async fn spawn(&self) -> Result<()> {
        if self.fail_spawn {
            return Err(AppError::Process("webui.sh: not found".to_string()));
        }
        self.spawns.fetch_add(1, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn terminate(&self) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        self.running.store(false, Ordering::SeqCst);
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Hands the supervisor to the service while the test keeps a view on it
struct SharedProcess(Arc<FakeProcess>);

#[async_trait]
impl ProcessSupervisor for SharedProcess {
    async fn spawn(&self) -> Result<()> {
        self.0.spawn().await
    }

    async fn terminate(&self) {
        self.0.terminate().await
    }

    fn is_running(&self) -> bool {
        self.0.is_running()
    }
}

#[derive(Default)]
struct RecordingClock {
    sleeps: Mutex<Vec<Duration>>,
}

#[async_trait]
impl Clock for RecordingClock {
    async fn sleep(&self, duration: Duration) {
        self.sleeps.lock().push(duration);
    }
}

struct Fixture {
    server: MockServer,
    service: StableDiffusionService,
    process: Arc<FakeProcess>,
    clock: Arc<RecordingClock>,
    scratch: TempDir,
}

async fn fixture(process: FakeProcess) -> Fixture {
    let server = MockServer::start().await;
    let scratch = tempfile::tempdir().unwrap();
    let process = Arc::new(process);
    let clock = Arc::new(RecordingClock::default());

    let config = BackendConfig {
        host: server.uri(),
        scratch_dir: scratch.path().to_string_lossy().into_owned(),
        ..BackendConfig::default()
    };
    let publisher = ImagePublisher::new(
        scratch.path(),
        ImageHost::with_client(reqwest::Client::new(), server.uri()),
    );
    let service = StableDiffusionService::new(
        &config,
        GenerationConfig::default(),
        Box::new(SharedProcess(process.clone())),
        publisher,
        clock.clone(),
    )
    .unwrap();

    Fixture {
        server,
        service,
        process,
        clock,
        scratch,
    }
}

async fn mount_image_host(server: &MockServer, seed: &str) {
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!("{}/k3j2h1g0fa.png\n", server.uri())))
        .expect(1)
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/k3j2h1g0fa.png"))
        .and(query_param("seed", seed))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG_BYTES))
        .expect(1)
        .mount(server)
        .await;
}

fn generation_response(seed: i64) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "images": [base64::encode(PNG_BYTES)],
        "parameters": {},
        "info": json!({ "seed": seed, "prompt": "a cat" }).to_string(),
    }))
}

#[tokio::test]
async fn test_start_spawns_and_waits() {
    let fx = fixture(FakeProcess::default()).await;

    fx.service.start().await.unwrap();

    assert_eq!(fx.service.state(), ServiceState::Running);
    assert_eq!(fx.process.spawns.load(Ordering::SeqCst), 1);
    // start always clears whatever was running before
    assert_eq!(fx.process.terminations.load(Ordering::SeqCst), 1);
    assert_eq!(*fx.clock.sleeps.lock(), vec![Duration::from_secs(25)]);

    fx.service.stop().await;
    assert_eq!(fx.service.state(), ServiceState::Stopped);
    assert!(!fx.process.is_running());
}

#[tokio::test]
async fn test_spawn_failure_leaves_backend_stopped() {
    let fx = fixture(FakeProcess {
        fail_spawn: true,
        ..FakeProcess::default()
    })
    .await;

    let err = fx.service.start().await.unwrap_err();

    assert!(matches!(err, AppError::Process(_)));
    assert_eq!(fx.service.state(), ServiceState::Stopped);
    assert!(fx.clock.sleeps.lock().is_empty());
}

#[tokio::test]
async fn test_text_to_image_publishes_with_resolved_seed() {
    let fx = fixture(FakeProcess::default()).await;

    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .and(body_partial_json(json!({
            "prompt": "a cat",
            "seed": -1,
            "sampler_name": "Euler a",
            "width": 512,
            "height": 512,
            "steps": 25,
        })))
        .respond_with(generation_response(3_141_592))
        .expect(1)
        .mount(&fx.server)
        .await;
    mount_image_host(&fx.server, "3141592").await;

    let url = fx.service.text_to_image("a cat", None).await.unwrap();

    assert_eq!(url, format!("{}/k3j2h1g0fa.png?seed=3141592", fx.server.uri()));
    // the staged file is gone once the upload is done
    assert_eq!(std::fs::read_dir(fx.scratch.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_text_to_image_passes_explicit_seed() {
    let fx = fixture(FakeProcess::default()).await;

    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .and(body_partial_json(json!({ "prompt": "a dog", "seed": 777 })))
        .respond_with(generation_response(777))
        .expect(1)
        .mount(&fx.server)
        .await;
    mount_image_host(&fx.server, "777").await;

    let url = fx.service.text_to_image("a dog", Some(777)).await.unwrap();
    assert!(url.ends_with("?seed=777"));
}

#[tokio::test]
async fn test_image_to_image_sends_source_image() {
    let fx = fixture(FakeProcess::default()).await;

    Mock::given(method("GET"))
        .and(path("/source.png"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(PNG_BYTES))
        .expect(1)
        .mount(&fx.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/sdapi/v1/img2img"))
        .and(body_partial_json(json!({
            "prompt": "snowy",
            "init_images": [base64::encode(PNG_BYTES)],
            "sampler_index": "Euler a",
            "denoising_strength": 0.75,
        })))
        .respond_with(generation_response(55))
        .expect(1)
        .mount(&fx.server)
        .await;
    mount_image_host(&fx.server, "55").await;

    let source = format!("{}/source.png?seed=9", fx.server.uri());
    let url = fx.service.image_to_image(&source, "snowy").await.unwrap();

    assert!(url.ends_with("/k3j2h1g0fa.png?seed=55"));
}

#[tokio::test]
async fn test_backend_error_status_is_reported() {
    let fx = fixture(FakeProcess::default()).await;

    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(ResponseTemplate::new(500).set_body_string("CUDA out of memory"))
        .mount(&fx.server)
        .await;

    let err = fx.service.text_to_image("a cat", None).await.unwrap_err();

    match err {
        AppError::Backend(message) => assert!(message.contains("CUDA out of memory")),
        other => panic!("expected a backend error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_unreachable_hosted_image_fails() {
    let fx = fixture(FakeProcess::default()).await;

    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(generation_response(1))
        .mount(&fx.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string(format!("{}/gone.png", fx.server.uri())))
        .mount(&fx.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/gone.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&fx.server)
        .await;

    let err = fx.service.text_to_image("a cat", None).await.unwrap_err();
    assert!(matches!(err, AppError::Upload(_)));
}

#[tokio::test]
async fn test_empty_upload_body_fails() {
    let fx = fixture(FakeProcess::default()).await;

    Mock::given(method("POST"))
        .and(path("/sdapi/v1/txt2img"))
        .respond_with(generation_response(1))
        .mount(&fx.server)
        .await;
    Mock::given(method("POST"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("  \n"))
        .mount(&fx.server)
        .await;

    let err = fx.service.text_to_image("a cat", None).await.unwrap_err();
    assert!(matches!(err, AppError::Upload(_)));
}

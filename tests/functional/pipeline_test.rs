//! Functional tests for queue, generator, worker and command handler working together

use async_trait::async_trait;
use illust_gateway::backend::{GenerationBackend, ServiceState};
use illust_gateway::clock::Clock;
use illust_gateway::command::{CommandContext, ParentMessage, PassthroughTranslator, Translator};
use illust_gateway::error::{AppError, Result};
use illust_gateway::generator::{RetryPolicy, MAX_RETRIES};
use illust_gateway::job::{Outcome, ReplyContext, ReplySink};
use illust_gateway::messages;
use illust_gateway::pipeline::Pipeline;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

#[derive(Debug, Clone, Copy)]
enum Step {
    Succeed,
    Fail,
    Panic,
}

/// Backend whose generation calls follow a script; succeeds once the script runs out
#[derive(Default)]
struct ScriptedBackend {
    script: Mutex<VecDeque<Step>>,
    starts: AtomicUsize,
    stops: AtomicUsize,
    calls: AtomicUsize,
    seeds: Mutex<Vec<Option<i64>>>,
    sources: Mutex<Vec<String>>,
    gate: Option<Arc<Notify>>,
    entered: Notify,
}

impl ScriptedBackend {
    fn with_script(steps: &[Step]) -> Self {
        Self {
            script: Mutex::new(steps.iter().copied().collect()),
            ..Default::default()
        }
    }

    fn gated(gate: Arc<Notify>) -> Self {
        Self {
            gate: Some(gate),
            ..Default::default()
        }
    }

    fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn generate(&self) -> Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.entered.notify_one();

        if let Some(gate) = &self.gate {
            gate.notified().await;
        }

        let step = self.script.lock().pop_front().unwrap_or(Step::Succeed);
        match step {
            Step::Succeed => Ok(format!("http://img.local/{}.png?seed=42", call)),
            Step::Fail => Err(AppError::Backend("connection refused".to_string())),
            Step::Panic => panic!("backend exploded"),
        }
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    async fn start(&self) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    async fn text_to_image(&self, _prompt: &str, seed: Option<i64>) -> Result<String> {
        self.seeds.lock().push(seed);
        self.generate().await
    }

    async fn image_to_image(&self, source_url: &str, _prompt: &str) -> Result<String> {
        self.sources.lock().push(source_url.to_string());
        self.generate().await
    }

    fn state(&self) -> ServiceState {
        ServiceState::Stopped
    }
}

/// Returns at once, remembering what it was asked to wait
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

#[derive(Default)]
struct RecordingSink {
    outcomes: Mutex<Vec<Outcome>>,
    delivered: Notify,
}

impl RecordingSink {
    fn outcomes(&self) -> Vec<Outcome> {
        self.outcomes.lock().clone()
    }

    async fn wait_for(&self, count: usize) -> Vec<Outcome> {
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let notified = self.delivered.notified();
                if self.outcomes.lock().len() >= count {
                    return self.outcomes();
                }
                notified.await;
            }
        })
        .await
        .expect("outcomes were not delivered in time")
    }
}

#[async_trait]
impl ReplySink for RecordingSink {
    async fn deliver(&self, outcome: Outcome) {
        self.outcomes.lock().push(outcome);
        self.delivered.notify_waiters();
    }
}

struct FailingTranslator;

#[async_trait]
impl Translator for FailingTranslator {
    async fn translate_to_english(&self, _text: &str) -> Result<String> {
        Err(AppError::Translation("quota exceeded".to_string()))
    }

    async fn translate_to_japanese(&self, _text: &str) -> Result<String> {
        Err(AppError::Translation("quota exceeded".to_string()))
    }

    async fn generate_poem_prompt(&self, _word: &str) -> Result<String> {
        Err(AppError::Translation("quota exceeded".to_string()))
    }
}

struct Harness {
    pipeline: Arc<Pipeline>,
    backend: Arc<ScriptedBackend>,
    clock: Arc<RecordingClock>,
    sink: Arc<RecordingSink>,
}

impl Harness {
    fn new(backend: ScriptedBackend) -> Self {
        Self::with_parts(backend, Arc::new(PassthroughTranslator), 10)
    }

    fn with_parts(backend: ScriptedBackend, translator: Arc<dyn Translator>, capacity: usize) -> Self {
        let backend = Arc::new(backend);
        let clock = Arc::new(RecordingClock::default());
        let policy = RetryPolicy {
            max_retries: MAX_RETRIES,
            delay: Duration::from_secs(10),
        };
        let pipeline = Arc::new(Pipeline::new(
            capacity,
            backend.clone(),
            translator,
            policy,
            clock.clone(),
        ));

        Self {
            pipeline,
            backend,
            clock,
            sink: Arc::new(RecordingSink::default()),
        }
    }

    fn sink(&self) -> Arc<dyn ReplySink> {
        self.sink.clone()
    }
}

fn context() -> CommandContext {
    CommandContext::new(ReplyContext::new("C1").with_origin(Some("100.001".to_string())))
}

#[tokio::test]
async fn test_successful_job_is_delivered_once() {
    let harness = Harness::new(ScriptedBackend::default());
    harness.pipeline.start();

    let accepted = harness
        .pipeline
        .commands()
        .handle_english_illust(&context(), harness.sink(), "a red fox")
        .await;
    assert!(accepted);

    let outcomes = harness.sink.wait_for(1).await;

    // Counted before shutdown, which stops the backend once more
    assert_eq!(harness.backend.starts(), 1);
    assert_eq!(harness.backend.calls(), 1);
    assert_eq!(harness.backend.stops(), 1);

    harness.pipeline.shutdown().await;

    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        Outcome::Image { url, label, alt_text, .. } => {
            assert_eq!(url, "http://img.local/1.png?seed=42");
            assert_eq!(label, "a red fox");
            assert_eq!(alt_text, "a red fox");
        }
        other => panic!("expected an image, got {:?}", other),
    }

    assert!(harness.clock.sleeps.lock().is_empty());
    assert_eq!(harness.sink.outcomes().len(), 1);
}

#[tokio::test]
async fn test_retries_are_exhausted_then_failure_is_reported() {
    let harness = Harness::new(ScriptedBackend::with_script(&[Step::Fail; 10]));
    harness.pipeline.start();

    harness
        .pipeline
        .commands()
        .handle_english_illust(&context(), harness.sink(), "a castle")
        .await;

    let outcomes = harness.sink.wait_for(1).await;
    harness.pipeline.shutdown().await;

    let attempts = MAX_RETRIES as usize + 1;
    assert_eq!(harness.backend.calls(), attempts);
    assert_eq!(harness.backend.starts(), attempts);
    assert!(harness.backend.stops() >= attempts);
    assert_eq!(
        *harness.clock.sleeps.lock(),
        vec![Duration::from_secs(10); MAX_RETRIES as usize]
    );

    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        Outcome::Failure { message, .. } => {
            assert!(message.starts_with(messages::GENERATION_FAILED));
            assert!(message.contains("connection refused"));
        }
        other => panic!("expected a failure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_transient_failures_recover() {
    let harness = Harness::new(ScriptedBackend::with_script(&[Step::Fail, Step::Fail]));
    harness.pipeline.start();

    harness
        .pipeline
        .commands()
        .handle_english_illust(&context(), harness.sink(), "a lighthouse")
        .await;

    let outcomes = harness.sink.wait_for(1).await;
    harness.pipeline.shutdown().await;

    assert!(outcomes[0].is_image());
    assert_eq!(harness.backend.calls(), 3);
    assert_eq!(harness.clock.sleeps.lock().len(), 2);
}

#[tokio::test]
async fn test_jobs_run_in_arrival_order() {
    let harness = Harness::new(ScriptedBackend::default());
    let commands = harness.pipeline.commands();

    for prompt in ["first", "second", "third"] {
        assert!(commands.handle_english_illust(&context(), harness.sink(), prompt).await);
    }
    harness.pipeline.start();

    let outcomes = harness.sink.wait_for(3).await;
    harness.pipeline.shutdown().await;

    let labels: Vec<_> = outcomes
        .iter()
        .map(|outcome| match outcome {
            Outcome::Image { label, .. } => label.clone(),
            other => panic!("expected an image, got {:?}", other),
        })
        .collect();
    assert_eq!(labels, vec!["first", "second", "third"]);
    assert_eq!(harness.pipeline.worker().processed(), 3);
}

#[tokio::test]
async fn test_img2img_without_parent_never_reaches_backend() {
    let harness = Harness::new(ScriptedBackend::default());
    harness.pipeline.start();

    let accepted = harness
        .pipeline
        .commands()
        .handle_img2img(&context(), harness.sink(), "make it snowy")
        .await;
    assert!(!accepted);

    let outcomes = harness.sink.outcomes();
    harness.pipeline.shutdown().await;

    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        Outcome::Notice { text, context } => {
            assert_eq!(text, messages::MISSING_SOURCE_IMAGE);
            assert_eq!(context.error_thread(), Some("100.001"));
        }
        other => panic!("expected a notice, got {:?}", other),
    }
    assert_eq!(harness.backend.starts(), 0);
    assert_eq!(harness.backend.calls(), 0);
    assert!(harness.pipeline.queue().is_empty());
}

#[tokio::test]
async fn test_img2img_uses_parent_image_and_thread() {
    let harness = Harness::new(ScriptedBackend::default());
    harness.pipeline.start();

    let ctx = context().with_parent(Some(ParentMessage {
        url: "http://img.local/parent.png?seed=9".to_string(),
        thread: Some("200.002".to_string()),
    }));
    assert!(
        harness
            .pipeline
            .commands()
            .handle_img2img(&ctx, harness.sink(), "make it snowy")
            .await
    );

    let outcomes = harness.sink.wait_for(1).await;
    harness.pipeline.shutdown().await;

    assert_eq!(
        *harness.backend.sources.lock(),
        vec!["http://img.local/parent.png?seed=9".to_string()]
    );
    assert_eq!(outcomes[0].context().thread.as_deref(), Some("200.002"));
}

#[tokio::test]
async fn test_parent_seed_is_reused() {
    let harness = Harness::new(ScriptedBackend::default());
    harness.pipeline.start();

    let ctx = context().with_parent(Some(ParentMessage {
        url: "http://img.local/parent.png?seed=777".to_string(),
        thread: Some("200.002".to_string()),
    }));
    harness
        .pipeline
        .commands()
        .handle_japanese_illust(&ctx, harness.sink(), "猫")
        .await;
    harness
        .pipeline
        .commands()
        .handle_poem(&context(), harness.sink(), "夕暮れ")
        .await;

    harness.sink.wait_for(2).await;
    harness.pipeline.shutdown().await;

    assert_eq!(*harness.backend.seeds.lock(), vec![Some(777), None]);
}

#[tokio::test]
async fn test_full_queue_rejects_with_notice() {
    let harness = Harness::with_parts(ScriptedBackend::default(), Arc::new(PassthroughTranslator), 1);
    let commands = harness.pipeline.commands();

    assert!(commands.handle_english_illust(&context(), harness.sink(), "fits").await);
    assert!(!commands.handle_english_illust(&context(), harness.sink(), "overflow").await);

    let outcomes = harness.sink.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(
        outcomes[0],
        Outcome::notice(messages::QUEUE_FULL, ReplyContext::new("C1").with_origin(Some("100.001".to_string())))
    );
    assert_eq!(harness.pipeline.queue().size(), 1);
}

#[tokio::test]
async fn test_translation_error_is_reported_and_nothing_queued() {
    let harness = Harness::with_parts(ScriptedBackend::default(), Arc::new(FailingTranslator), 10);

    let accepted = harness
        .pipeline
        .commands()
        .handle_japanese_illust(&context(), harness.sink(), "猫")
        .await;
    assert!(!accepted);

    let outcomes = harness.sink.outcomes();
    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        Outcome::Notice { text, .. } => {
            assert_eq!(text, &messages::command_error("quota exceeded"));
        }
        other => panic!("expected a notice, got {:?}", other),
    }
    assert!(harness.pipeline.queue().is_empty());
}

#[tokio::test]
async fn test_queue_status_lists_waiting_prompts() {
    let harness = Harness::new(ScriptedBackend::default());
    let commands = harness.pipeline.commands();
    commands.handle_english_illust(&context(), harness.sink(), "a fox").await;
    commands.handle_english_illust(&context(), harness.sink(), "a crow").await;

    commands.handle_queue_status(&context(), harness.sink()).await;

    let outcomes = harness.sink.outcomes();
    assert_eq!(outcomes.len(), 2);
    assert_eq!(
        outcomes[0],
        Outcome::notice(messages::queue_length(2), context().reply_context)
    );
    assert_eq!(outcomes[1], Outcome::notice("a fox\na crow", context().reply_context));
}

#[tokio::test]
async fn test_panic_in_job_does_not_stop_worker() {
    let harness = Harness::new(ScriptedBackend::with_script(&[Step::Panic]));
    harness.pipeline.start();
    let commands = harness.pipeline.commands();

    commands.handle_english_illust(&context(), harness.sink(), "cursed").await;
    commands.handle_english_illust(&context(), harness.sink(), "fine").await;

    let outcomes = harness.sink.wait_for(2).await;
    assert!(harness.pipeline.worker().is_running());
    harness.pipeline.shutdown().await;

    match &outcomes[0] {
        Outcome::Failure { message, .. } => {
            assert!(message.starts_with(messages::GENERATION_FAILED));
            assert!(message.contains("backend exploded"));
        }
        other => panic!("expected a failure, got {:?}", other),
    }
    assert!(outcomes[1].is_image());
    assert!(harness.backend.stops() >= 2);
}

#[tokio::test]
async fn test_stop_lets_inflight_job_finish() {
    let gate = Arc::new(Notify::new());
    let harness = Harness::new(ScriptedBackend::gated(gate.clone()));
    harness.pipeline.start();
    let commands = harness.pipeline.commands();

    commands.handle_english_illust(&context(), harness.sink(), "in flight").await;
    commands.handle_english_illust(&context(), harness.sink(), "left behind").await;

    tokio::time::timeout(Duration::from_secs(5), harness.backend.entered.notified())
        .await
        .expect("first job reached the backend");

    // Stop is requested first; the gate opens while it is waiting.
    futures::join!(harness.pipeline.worker().stop(), async { gate.notify_one() });

    let outcomes = harness.sink.outcomes();
    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        Outcome::Image { label, .. } => assert_eq!(label, "in flight"),
        other => panic!("expected an image, got {:?}", other),
    }
    assert_eq!(harness.backend.calls(), 1);
    assert!(!harness.pipeline.worker().is_running());
    assert_eq!(harness.pipeline.queue().size(), 1);
}

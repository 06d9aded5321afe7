use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::backend::GenerationBackend;
use crate::models::{GenerateRequest, Generation, MAX_PROMPT_CHARS};

/// Total attempts per submission: the first call plus two automatic retries.
pub const MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Submitting,
    Retrying,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LastFailure {
    pub message: String,
    pub attempts: u32,
}

/// Read-only snapshot published to the presentation layer. `attempt` is
/// 1-based while a submission is active and 0 when idle.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerState {
    pub phase: Phase,
    pub attempt: u32,
    pub last_failure: Option<LastFailure>,
}

impl ControllerState {
    fn idle() -> Self {
        Self {
            phase: Phase::Idle,
            attempt: 0,
            last_failure: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed(Generation),
    /// The user cancelled; not an error and never retried.
    Aborted,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("no image selected")]
    MissingImage,
    #[error("prompt is empty")]
    EmptyPrompt,
    #[error("prompt too long: {0} characters")]
    PromptTooLong(usize),
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("a generation is already in flight")]
    InFlight,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("{message}")]
    Failed { message: String, attempts: u32 },
}

pub fn validate(request: &GenerateRequest) -> Result<(), ValidationError> {
    if request.image_data_url.trim().is_empty() {
        return Err(ValidationError::MissingImage);
    }
    let prompt = request.prompt.trim();
    if prompt.is_empty() {
        return Err(ValidationError::EmptyPrompt);
    }
    let chars = prompt.chars().count();
    if chars > MAX_PROMPT_CHARS {
        return Err(ValidationError::PromptTooLong(chars));
    }
    Ok(())
}

/// Drives a single in-flight generation request: submission, bounded
/// retry with exponential backoff, and cooperative cancellation. State is
/// only ever written by the active `generate` call, so observers get a
/// consistent transition order.
pub struct GenerationController {
    backend: Arc<dyn GenerationBackend>,
    state: watch::Sender<ControllerState>,
    cancel: Mutex<Option<watch::Sender<bool>>>,
    in_flight: AtomicBool,
}

impl GenerationController {
    pub fn new(backend: Arc<dyn GenerationBackend>) -> Self {
        let (state, _) = watch::channel(ControllerState::idle());
        Self {
            backend,
            state,
            cancel: Mutex::new(None),
            in_flight: AtomicBool::new(false),
        }
    }

    /// Subscribe to state-change notifications.
    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> ControllerState {
        self.state.borrow().clone()
    }

    pub fn is_generating(&self) -> bool {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Cancel the in-flight request, if any. Idempotent; a no-op when idle.
    pub fn abort(&self) {
        if let Some(cancel) = self.cancel.lock().take() {
            info!("🛑 Abort requested");
            let _ = cancel.send(true);
        }
    }

    /// Run one logical submission to completion. Returns `InFlight`
    /// without side effects when a request is already active, reports
    /// validation failures before any network call, retries failures up
    /// to the attempt budget, and resolves to `Outcome::Aborted` when the
    /// user cancels.
    pub async fn generate(&self, request: GenerateRequest) -> Result<Outcome, GenerateError> {
        validate(&request)?;
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(GenerateError::InFlight);
        }
        let _guard = InFlightGuard { controller: self };

        let (cancel_tx, mut cancel_rx) = watch::channel(false);
        *self.cancel.lock() = Some(cancel_tx);

        let mut attempt = 1u32;
        loop {
            self.state.send_replace(ControllerState {
                phase: Phase::Submitting,
                attempt,
                last_failure: None,
            });
            info!("🚀 Generation attempt {}/{}", attempt, MAX_ATTEMPTS);

            let result = tokio::select! {
                biased;
                _ = cancelled(&mut cancel_rx) => {
                    info!("🛑 Generation aborted during attempt {}", attempt);
                    self.state.send_replace(ControllerState::idle());
                    return Ok(Outcome::Aborted);
                }
                result = self.backend.generate(&request) => result,
            };

            match result {
                Ok(generation) => {
                    info!("✅ Generation {} succeeded on attempt {}", generation.id, attempt);
                    self.state.send_replace(ControllerState::idle());
                    return Ok(Outcome::Completed(generation));
                }
                Err(err) if attempt < MAX_ATTEMPTS => {
                    let delay = Duration::from_secs(1u64 << (attempt - 1));
                    warn!("🔄 Attempt {} failed ({}); retrying in {:?}", attempt, err, delay);
                    self.state.send_replace(ControllerState {
                        phase: Phase::Retrying,
                        attempt,
                        last_failure: None,
                    });
                    tokio::select! {
                        biased;
                        _ = cancelled(&mut cancel_rx) => {
                            info!("🛑 Generation aborted during backoff");
                            self.state.send_replace(ControllerState::idle());
                            return Ok(Outcome::Aborted);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(err) => {
                    let message = err.to_string();
                    error!("❌ Generation failed after {} attempts: {}", attempt, message);
                    self.state.send_replace(ControllerState {
                        phase: Phase::Idle,
                        attempt: 0,
                        last_failure: Some(LastFailure {
                            message: message.clone(),
                            attempts: attempt,
                        }),
                    });
                    return Err(GenerateError::Failed {
                        message,
                        attempts: attempt,
                    });
                }
            }
        }
    }
}

/// Resolves once cancellation is signalled; pends forever otherwise.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    if rx.wait_for(|cancelled| *cancelled).await.is_err() {
        std::future::pending::<()>().await;
    }
}

struct InFlightGuard<'a> {
    controller: &'a GenerationController,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.controller.cancel.lock().take();
        self.controller.in_flight.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendError;
    use crate::models::Style;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    fn sample_generation(id: &str) -> Generation {
        Generation {
            id: id.into(),
            image_url: "https://example.com/gen.jpg".into(),
            prompt: "a wool coat".into(),
            style: Style::Editorial,
            created_at: Utc::now(),
        }
    }

    fn valid_request() -> GenerateRequest {
        GenerateRequest::new("data:image/jpeg;base64,abcd", "a wool coat", Style::Editorial)
    }

    fn overloaded() -> BackendError {
        BackendError::Status {
            status: 503,
            message: "Model overloaded".into(),
        }
    }

    /// Pops a scripted response per call.
    struct ScriptedBackend {
        calls: AtomicUsize,
        script: Mutex<VecDeque<Result<Generation, BackendError>>>,
    }

    impl ScriptedBackend {
        fn new(script: Vec<Result<Generation, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script.into()),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerationBackend for ScriptedBackend {
        async fn generate(&self, _request: &GenerateRequest) -> Result<Generation, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .pop_front()
                .unwrap_or_else(|| Ok(sample_generation("gen_fallback")))
        }
    }

    /// Blocks each call until released, so tests can hold a request open.
    struct GatedBackend {
        calls: AtomicUsize,
        release: Notify,
    }

    impl GatedBackend {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                release: Notify::new(),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl GenerationBackend for GatedBackend {
        async fn generate(&self, _request: &GenerateRequest) -> Result<Generation, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.release.notified().await;
            Ok(sample_generation("gen_gated"))
        }
    }

    #[tokio::test]
    async fn empty_prompt_is_rejected_before_any_network_call() {
        let backend = ScriptedBackend::new(vec![]);
        let controller = GenerationController::new(backend.clone());
        let request = GenerateRequest::new("data:image/jpeg;base64,abcd", "   ", Style::Editorial);
        let err = controller.generate(request).await.unwrap_err();
        assert!(matches!(err, GenerateError::Validation(ValidationError::EmptyPrompt)));
        assert_eq!(backend.calls(), 0);
        assert_eq!(controller.state(), ControllerState::idle());
    }

    #[tokio::test]
    async fn missing_image_and_oversized_prompt_are_rejected() {
        let request = GenerateRequest::new("", "a coat", Style::Editorial);
        assert_eq!(validate(&request), Err(ValidationError::MissingImage));

        let long = "x".repeat(MAX_PROMPT_CHARS + 1);
        let request = GenerateRequest::new("data:image/jpeg;base64,abcd", &long, Style::Editorial);
        assert!(matches!(validate(&request), Err(ValidationError::PromptTooLong(_))));
    }

    #[tokio::test]
    async fn success_returns_the_generation_and_goes_idle() {
        let backend = ScriptedBackend::new(vec![Ok(sample_generation("gen_1"))]);
        let controller = GenerationController::new(backend.clone());
        let outcome = controller.generate(valid_request()).await.unwrap();
        match outcome {
            Outcome::Completed(generation) => assert_eq!(generation.id, "gen_1"),
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(backend.calls(), 1);
        assert_eq!(controller.state(), ControllerState::idle());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_with_one_and_two_second_backoff_then_surfaces_failure() {
        let backend = ScriptedBackend::new(vec![Err(overloaded()), Err(overloaded()), Err(overloaded())]);
        let controller = GenerationController::new(backend.clone());

        let started = tokio::time::Instant::now();
        let err = controller.generate(valid_request()).await.unwrap_err();

        assert_eq!(started.elapsed(), Duration::from_secs(3));
        assert_eq!(backend.calls(), 3);
        match err {
            GenerateError::Failed { message, attempts } => {
                assert_eq!(message, "Model overloaded");
                assert_eq!(attempts, 3);
            }
            other => panic!("expected failure, got {other:?}"),
        }

        let state = controller.state();
        assert_eq!(state.phase, Phase::Idle);
        assert_eq!(state.attempt, 0);
        assert_eq!(
            state.last_failure,
            Some(LastFailure {
                message: "Model overloaded".into(),
                attempts: 3,
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn recovers_on_a_later_attempt_and_clears_the_failure() {
        let backend = ScriptedBackend::new(vec![Err(overloaded()), Ok(sample_generation("gen_2"))]);
        let controller = GenerationController::new(backend.clone());

        let started = tokio::time::Instant::now();
        let outcome = controller.generate(valid_request()).await.unwrap();

        assert_eq!(started.elapsed(), Duration::from_secs(1));
        assert_eq!(backend.calls(), 2);
        assert!(matches!(outcome, Outcome::Completed(g) if g.id == "gen_2"));
        assert_eq!(controller.state(), ControllerState::idle());
    }

    #[tokio::test]
    async fn second_generate_while_pending_is_rejected_without_a_second_call() {
        let backend = GatedBackend::new();
        let controller = Arc::new(GenerationController::new(backend.clone()));

        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.generate(valid_request()).await }
        });

        let mut states = controller.subscribe();
        states.wait_for(|s| s.phase == Phase::Submitting).await.unwrap();

        let second = controller.generate(valid_request()).await;
        assert!(matches!(second, Err(GenerateError::InFlight)));

        backend.release.notify_one();
        let outcome = task.await.unwrap().unwrap();
        assert!(matches!(outcome, Outcome::Completed(_)));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn abort_goes_idle_and_the_next_generate_starts_clean() {
        let backend = GatedBackend::new();
        let controller = Arc::new(GenerationController::new(backend.clone()));

        // Aborting with nothing in flight is a no-op.
        controller.abort();
        assert_eq!(controller.state(), ControllerState::idle());

        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.generate(valid_request()).await }
        });
        let mut states = controller.subscribe();
        states.wait_for(|s| s.phase == Phase::Submitting).await.unwrap();

        controller.abort();
        controller.abort(); // idempotent
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, Outcome::Aborted);
        assert_eq!(controller.state(), ControllerState::idle());
        assert!(!controller.is_generating());

        // Fresh submission succeeds with no residual retry count.
        backend.release.notify_one();
        let outcome = controller.generate(valid_request()).await.unwrap();
        assert!(matches!(outcome, Outcome::Completed(_)));
        assert_eq!(backend.calls(), 2);
        assert_eq!(controller.state(), ControllerState::idle());
    }

    #[tokio::test]
    async fn abort_during_backoff_cancels_the_scheduled_retry() {
        let backend = ScriptedBackend::new(vec![Err(overloaded())]);
        let controller = Arc::new(GenerationController::new(backend.clone()));

        let task = tokio::spawn({
            let controller = controller.clone();
            async move { controller.generate(valid_request()).await }
        });

        let mut states = controller.subscribe();
        let observed = states.wait_for(|s| s.phase == Phase::Retrying).await.unwrap().clone();
        assert_eq!(observed.attempt, 1);

        controller.abort();
        let outcome = task.await.unwrap().unwrap();
        assert_eq!(outcome, Outcome::Aborted);
        // The retry never fired and no error is surfaced.
        assert_eq!(backend.calls(), 1);
        assert_eq!(controller.state(), ControllerState::idle());
    }
}

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use retouch_contracts::codec::{normalize, CanonicalImage, CodecError, ImageResource};
use retouch_contracts::errors::{EngineError, ErrorDescriptor, ValidationError};
use retouch_contracts::events::{image_summary, EventPayload, EventWriter};
use retouch_contracts::presets::PresetCatalog;
use retouch_contracts::progress::ProgressCurve;
use retouch_contracts::session::{
    Completion, Session, SessionSnapshot, SessionStatus, Ticket, TransformDispatch,
};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::{run_engine, TransformEngine, TransformRequest};

/// Intents the presentation layer can raise.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    UploadRequested(ImageResource),
    PresetSelected(String),
    CustomInstructionSubmitted(String),
    RevertRequested,
    ResetRequested,
}

/// What an accepted event did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accepted {
    Dispatched(Ticket),
    Reverted { changed: bool },
    Reset { abandoned: Option<Ticket> },
}

/// Result of folding one worker message into the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Loaded,
    LoadFailed(ErrorDescriptor),
    Transformed,
    TransformFailed(ErrorDescriptor),
    Stale(Ticket),
}

enum WorkerMessage {
    Loaded {
        ticket: Ticket,
        result: Result<CanonicalImage, CodecError>,
    },
    Transformed {
        ticket: Ticket,
        result: Result<CanonicalImage, EngineError>,
        elapsed: Duration,
    },
}

#[derive(Debug, Clone)]
pub struct ControllerOptions {
    pub catalog: PresetCatalog,
    pub progress_curve: ProgressCurve,
    pub progress_tick: Duration,
    pub events: Option<EventWriter>,
}

impl ControllerOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            progress_curve: config.progress_curve,
            progress_tick: config.progress_tick,
            ..Self::default()
        }
    }

    pub fn with_events(mut self, events: Option<EventWriter>) -> Self {
        self.events = events;
        self
    }
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            catalog: PresetCatalog::default(),
            progress_curve: ProgressCurve::default(),
            progress_tick: Duration::from_millis(100),
            events: None,
        }
    }
}

/// Owns the [`Session`] and runs its slow steps on worker threads.
///
/// Workers only ever send results back over a channel; folding them in
/// happens here, on the owner's thread, so the session has a single writer.
/// While a request is pending every other dispatch is refused.
pub struct SessionController {
    session: Session,
    engine: Arc<dyn TransformEngine>,
    events: Option<EventWriter>,
    progress: crate::ProgressTicker,
    sender: mpsc::Sender<WorkerMessage>,
    receiver: mpsc::Receiver<WorkerMessage>,
}

impl SessionController {
    pub fn new(engine: Arc<dyn TransformEngine>, options: ControllerOptions) -> Self {
        let (sender, receiver) = mpsc::channel();
        let controller = Self {
            session: Session::new(options.catalog),
            engine,
            events: options.events,
            progress: crate::ProgressTicker::new(options.progress_curve, options.progress_tick),
            sender,
            receiver,
        };
        let mut payload = EventPayload::new();
        payload.insert(
            "engine".to_string(),
            Value::String(controller.engine.name().to_string()),
        );
        controller.emit("session_started", payload);
        controller
    }

    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    pub fn catalog(&self) -> PresetCatalog {
        self.session.catalog()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.session.snapshot()
    }

    pub fn is_pending(&self) -> bool {
        self.session.status() == SessionStatus::Pending
    }

    pub fn progress(&self) -> f64 {
        self.progress.value()
    }

    pub fn handle(&mut self, event: SessionEvent) -> Result<Accepted, ValidationError> {
        match event {
            SessionEvent::UploadRequested(resource) => self.upload(resource).map(Accepted::Dispatched),
            SessionEvent::PresetSelected(id) => self.apply_preset(&id).map(Accepted::Dispatched),
            SessionEvent::CustomInstructionSubmitted(text) => {
                self.apply_custom_instruction(&text).map(Accepted::Dispatched)
            }
            SessionEvent::RevertRequested => self
                .revert_to_original()
                .map(|changed| Accepted::Reverted { changed }),
            SessionEvent::ResetRequested => Ok(Accepted::Reset {
                abandoned: self.reset(),
            }),
        }
    }

    pub fn upload(&mut self, resource: ImageResource) -> Result<Ticket, ValidationError> {
        let ticket = self.session.begin_load().inspect_err(|err| {
            debug!(error = %err, "upload rejected");
        })?;
        info!(request = ticket.request, bytes = resource.bytes.len(), "normalizing upload");

        let sender = self.sender.clone();
        let spawned = thread::Builder::new()
            .name("retouch-decode".to_string())
            .spawn(move || {
                let result = panic::catch_unwind(AssertUnwindSafe(|| normalize(&resource)))
                    .unwrap_or_else(|payload| {
                        Err(CodecError::Undecodable(format!(
                            "decode worker panicked: {}",
                            panic_text(payload.as_ref())
                        )))
                    });
                let _ = sender.send(WorkerMessage::Loaded { ticket, result });
            });
        if let Err(err) = spawned {
            warn!(error = %err, "decode thread spawn failed");
            self.fold(WorkerMessage::Loaded {
                ticket,
                result: Err(CodecError::Undecodable(format!(
                    "decode worker unavailable: {err}"
                ))),
            });
        }
        Ok(ticket)
    }

    pub fn apply_preset(&mut self, preset_id: &str) -> Result<Ticket, ValidationError> {
        let dispatch = self.session.begin_preset(preset_id).inspect_err(|err| {
            debug!(preset = preset_id, error = %err, "preset rejected");
        })?;
        Ok(self.run_transformation(dispatch))
    }

    pub fn apply_custom_instruction(&mut self, text: &str) -> Result<Ticket, ValidationError> {
        let dispatch = self.session.begin_custom(text).inspect_err(|err| {
            debug!(error = %err, "custom instruction rejected");
        })?;
        Ok(self.run_transformation(dispatch))
    }

    pub fn revert_to_original(&mut self) -> Result<bool, ValidationError> {
        let changed = self.session.revert_to_original()?;
        if changed {
            info!("reverted to original");
            self.emit("reverted", EventPayload::new());
        }
        Ok(changed)
    }

    /// Returns to Empty. Anything still in flight is left to finish and
    /// dropped on arrival.
    pub fn reset(&mut self) -> Option<Ticket> {
        let abandoned = self.session.reset();
        self.progress.finish();
        let mut payload = EventPayload::new();
        if let Some(ticket) = abandoned {
            info!(request = ticket.request, "reset abandoned in-flight request");
            payload.insert("abandoned_request".to_string(), Value::from(ticket.request));
        }
        payload.insert(
            "generation".to_string(),
            Value::from(self.session.generation()),
        );
        self.emit("reset", payload);
        abandoned
    }

    /// Folds every result that has already arrived.
    pub fn poll(&mut self) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while let Ok(message) = self.receiver.try_recv() {
            outcomes.push(self.fold(message));
        }
        outcomes
    }

    /// Waits up to `timeout` for the next worker message of any kind,
    /// including stale ones.
    pub fn next_outcome(&mut self, timeout: Duration) -> Option<Outcome> {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => Some(self.fold(message)),
            Err(_) => None,
        }
    }

    /// Waits until the pending request settles or `timeout` passes. Returns
    /// `None` when nothing was pending or the wait timed out.
    pub fn wait(&mut self, timeout: Duration) -> Option<Outcome> {
        let deadline = Instant::now() + timeout;
        while self.is_pending() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return None;
            }
            match self.next_outcome(remaining) {
                Some(Outcome::Stale(_)) => continue,
                Some(outcome) => return Some(outcome),
                None => return None,
            }
        }
        None
    }

    fn run_transformation(&mut self, dispatch: TransformDispatch) -> Ticket {
        let TransformDispatch {
            ticket,
            source,
            instruction,
            preset,
        } = dispatch;
        info!(
            request = ticket.request,
            engine = self.engine.name(),
            preset = preset.unwrap_or("custom"),
            source = %source.digest(),
            "transform dispatched"
        );
        let mut payload = EventPayload::new();
        payload.insert("request".to_string(), Value::from(ticket.request));
        payload.insert(
            "preset".to_string(),
            preset.map(|id| Value::String(id.to_string())).unwrap_or(Value::Null),
        );
        payload.insert("instruction".to_string(), Value::String(instruction.clone()));
        payload.insert("source".to_string(), image_summary(&source));
        self.emit("transform_dispatched", payload);

        self.progress.start();
        let engine = Arc::clone(&self.engine);
        let sender = self.sender.clone();
        let request = TransformRequest {
            image: source,
            instruction,
        };
        let spawned = thread::Builder::new()
            .name("retouch-transform".to_string())
            .spawn(move || {
                let started = Instant::now();
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    run_engine(engine.as_ref(), &request)
                }))
                .unwrap_or_else(|payload| {
                    Err(EngineError::new(format!(
                        "transform worker panicked: {}",
                        panic_text(payload.as_ref())
                    )))
                })
                .map(|response| {
                    for warning in &response.warnings {
                        warn!(warning = %warning, "engine warning");
                    }
                    response.image
                });
                let _ = sender.send(WorkerMessage::Transformed {
                    ticket,
                    result,
                    elapsed: started.elapsed(),
                });
            });
        if let Err(err) = spawned {
            warn!(error = %err, "transform thread spawn failed");
            self.fold(WorkerMessage::Transformed {
                ticket,
                result: Err(EngineError::new(format!(
                    "transform worker unavailable: {err}"
                ))),
                elapsed: Duration::ZERO,
            });
        }
        ticket
    }

    fn fold(&mut self, message: WorkerMessage) -> Outcome {
        match message {
            WorkerMessage::Loaded { ticket, result } => {
                let summary = result.as_ref().ok().map(image_summary);
                match self.session.complete_load(ticket, result) {
                    Completion::Applied => {
                        info!(request = ticket.request, "image loaded");
                        let mut payload = EventPayload::new();
                        payload.insert(
                            "image".to_string(),
                            summary.unwrap_or(Value::Null),
                        );
                        self.emit("image_loaded", payload);
                        Outcome::Loaded
                    }
                    Completion::Failed(error) => {
                        warn!(request = ticket.request, error = %error.message, "image load failed");
                        self.emit("image_load_failed", error_payload(&error));
                        Outcome::LoadFailed(error)
                    }
                    Completion::Stale => self.drop_stale(ticket),
                }
            }
            WorkerMessage::Transformed {
                ticket,
                result,
                elapsed,
            } => {
                let summary = result.as_ref().ok().map(image_summary);
                let completion = self.session.complete_transformation(ticket, result);
                if completion == Completion::Stale {
                    return self.drop_stale(ticket);
                }
                self.progress.finish();
                let latency_ms = elapsed.as_millis() as u64;
                match completion {
                    Completion::Failed(error) => {
                        warn!(
                            request = ticket.request,
                            latency_ms,
                            error = %error.message,
                            "transform failed"
                        );
                        let mut payload = error_payload(&error);
                        payload.insert("latency_ms".to_string(), Value::from(latency_ms));
                        self.emit("transform_failed", payload);
                        Outcome::TransformFailed(error)
                    }
                    _ => {
                        info!(request = ticket.request, latency_ms, "transform succeeded");
                        let mut payload = EventPayload::new();
                        payload.insert("request".to_string(), Value::from(ticket.request));
                        payload.insert("latency_ms".to_string(), Value::from(latency_ms));
                        payload.insert("image".to_string(), summary.unwrap_or(Value::Null));
                        self.emit("transform_succeeded", payload);
                        Outcome::Transformed
                    }
                }
            }
        }
    }

    fn drop_stale(&self, ticket: Ticket) -> Outcome {
        debug!(
            request = ticket.request,
            generation = ticket.generation,
            "dropping stale result"
        );
        let mut payload = EventPayload::new();
        payload.insert("request".to_string(), Value::from(ticket.request));
        payload.insert("generation".to_string(), Value::from(ticket.generation));
        self.emit("stale_result_dropped", payload);
        Outcome::Stale(ticket)
    }

    fn emit(&self, event_type: &str, payload: EventPayload) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit(event_type, payload) {
            warn!(event = event_type, error = %err, "failed to write session event");
        }
    }
}

fn panic_text(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|text| text.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "no message".to_string())
}

fn error_payload(error: &ErrorDescriptor) -> EventPayload {
    let mut payload = EventPayload::new();
    payload.insert(
        "error_kind".to_string(),
        Value::String(error.kind.as_str().to_string()),
    );
    payload.insert("error".to_string(), Value::String(error.message.clone()));
    payload
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Result};

    use crate::fixtures::{canonical, png_bytes};
    use crate::TransformResponse;

    use super::*;

    const WAIT: Duration = Duration::from_secs(5);

    struct Tint([u8; 3]);

    impl TransformEngine for Tint {
        fn name(&self) -> &str {
            "tint"
        }

        fn transform(&self, request: &TransformRequest) -> Result<TransformResponse> {
            if request.instruction.contains("fail") {
                return Err(anyhow!("engine refused"));
            }
            Ok(TransformResponse {
                image: canonical(self.0),
                warnings: vec!["tinted".to_string()],
            })
        }
    }

    fn controller() -> SessionController {
        SessionController::new(Arc::new(Tint([7, 7, 7])), ControllerOptions::default())
    }

    fn upload(controller: &mut SessionController, rgb: [u8; 3]) -> Result<()> {
        controller.upload(ImageResource::from_bytes(png_bytes(rgb), Some("image/png")))?;
        assert_eq!(controller.wait(WAIT), Some(Outcome::Loaded));
        Ok(())
    }

    #[test]
    fn upload_then_preset_lands_engine_output() -> Result<()> {
        let mut controller = controller();
        upload(&mut controller, [1, 2, 3])?;
        assert_eq!(controller.snapshot().original, Some(canonical([1, 2, 3])));

        controller.handle(SessionEvent::PresetSelected("vintage".to_string()))?;
        assert!(controller.is_pending());
        assert_eq!(controller.wait(WAIT), Some(Outcome::Transformed));
        let snapshot = controller.snapshot();
        assert_eq!(snapshot.current, Some(canonical([7, 7, 7])));
        assert_eq!(snapshot.active_selection.as_deref(), Some("vintage"));
        assert_eq!(controller.progress(), 100.0);
        Ok(())
    }

    #[test]
    fn engine_failure_is_recorded_as_transformation_error() -> Result<()> {
        let mut controller = controller();
        upload(&mut controller, [1, 2, 3])?;
        controller.apply_custom_instruction("please fail")?;
        let outcome = controller.wait(WAIT);
        assert!(matches!(
            outcome,
            Some(Outcome::TransformFailed(ref error)) if error.message == "engine refused"
        ));
        let snapshot = controller.snapshot();
        assert!(snapshot.current.is_none());
        assert_eq!(
            snapshot.last_error.map(|error| error.to_string()),
            Some("Transformation failed: engine refused".to_string())
        );
        Ok(())
    }

    #[test]
    fn validation_errors_are_returned_not_stored() {
        let mut controller = controller();
        assert_eq!(
            controller
                .handle(SessionEvent::CustomInstructionSubmitted("glow".to_string()))
                .err(),
            Some(ValidationError::NoSourceImage)
        );
        assert!(controller.snapshot().last_error.is_none());
        assert!(!controller.is_pending());
    }

    #[test]
    fn undecodable_upload_reports_load_failure() -> Result<()> {
        let mut controller = controller();
        controller.upload(ImageResource::from_bytes(b"not an image".to_vec(), None))?;
        assert!(matches!(controller.wait(WAIT), Some(Outcome::LoadFailed(_))));
        assert!(controller.snapshot().original.is_none());
        Ok(())
    }

    #[test]
    fn revert_and_reset_through_handle() -> Result<()> {
        let mut controller = controller();
        assert_eq!(
            controller.handle(SessionEvent::RevertRequested)?,
            Accepted::Reverted { changed: false }
        );
        upload(&mut controller, [1, 2, 3])?;
        controller.apply_preset("sketch")?;
        controller.wait(WAIT);
        assert_eq!(
            controller.handle(SessionEvent::RevertRequested)?,
            Accepted::Reverted { changed: true }
        );
        assert_eq!(
            controller.handle(SessionEvent::ResetRequested)?,
            Accepted::Reset { abandoned: None }
        );
        assert!(controller.snapshot().original.is_none());
        Ok(())
    }

    #[test]
    fn progress_is_zero_right_after_dispatch() -> Result<()> {
        let options = ControllerOptions {
            progress_tick: Duration::from_secs(60),
            ..ControllerOptions::default()
        };
        let mut controller = SessionController::new(Arc::new(Tint([7, 7, 7])), options);
        upload(&mut controller, [1, 2, 3])?;
        controller.apply_preset("cyberpunk")?;
        assert_eq!(controller.progress(), 0.0);
        controller.wait(WAIT);
        assert_eq!(controller.progress(), 100.0);
        Ok(())
    }

    #[test]
    fn wait_without_pending_request_returns_none() {
        let mut controller = controller();
        assert_eq!(controller.wait(Duration::from_millis(10)), None);
        assert!(controller.poll().is_empty());
    }

    #[test]
    fn panic_text_reads_str_and_string_payloads() {
        let literal: Box<dyn Any + Send> = Box::new("boom");
        let owned: Box<dyn Any + Send> = Box::new(format!("code {}", 7));
        let other: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_text(literal.as_ref()), "boom");
        assert_eq!(panic_text(owned.as_ref()), "code 7");
        assert_eq!(panic_text(other.as_ref()), "no message");
    }

    #[test]
    fn options_follow_config() {
        let config = EngineConfig::from_lookup(|key| {
            (key == "RETOUCH_PROGRESS_TICK_MS").then(|| "250".to_string())
        });
        let options = ControllerOptions::from_config(&config);
        assert_eq!(options.progress_tick, Duration::from_millis(250));
        assert!(options.events.is_none());
    }
}

use serde::Serialize;

use crate::codec::{normalize, CanonicalImage, CodecError, ImageResource};
use crate::errors::{EngineError, ErrorDescriptor, ValidationError};
use crate::presets::PresetCatalog;

use super::snapshot::{SessionPhase, SessionSnapshot, SessionStatus};

/// Identifies one dispatched request. A completion is only folded in when its
/// ticket is the one currently in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Ticket {
    pub generation: u64,
    pub request: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Load,
    Transform,
}

/// Work handed out by a successful `begin_*` transformation call.
#[derive(Debug, Clone)]
pub struct TransformDispatch {
    pub ticket: Ticket,
    pub source: CanonicalImage,
    pub instruction: String,
    pub preset: Option<&'static str>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Completion {
    Applied,
    Failed(ErrorDescriptor),
    /// The session was reset (or the ticket is otherwise unknown); the result
    /// was dropped without touching state.
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    ticket: Ticket,
    kind: RequestKind,
}

/// Image lineage and request status for one editing flow.
///
/// Mutation is split into `begin_*` (validate, go Pending, hand out work) and
/// `complete_*` (fold the result back). Whoever owns the session is the only
/// writer; the work itself can run anywhere.
#[derive(Debug, Clone)]
pub struct Session {
    catalog: PresetCatalog,
    original: Option<CanonicalImage>,
    current: Option<CanonicalImage>,
    status: SessionStatus,
    last_error: Option<ErrorDescriptor>,
    active_selection: Option<String>,
    custom_instruction: Option<String>,
    generation: u64,
    next_request: u64,
    in_flight: Option<InFlight>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(PresetCatalog::default())
    }
}

impl Session {
    pub fn new(catalog: PresetCatalog) -> Self {
        Self {
            catalog,
            original: None,
            current: None,
            status: SessionStatus::Idle,
            last_error: None,
            active_selection: None,
            custom_instruction: None,
            generation: 0,
            next_request: 0,
            in_flight: None,
        }
    }

    pub fn catalog(&self) -> PresetCatalog {
        self.catalog
    }

    pub fn original(&self) -> Option<&CanonicalImage> {
        self.original.as_ref()
    }

    pub fn current(&self) -> Option<&CanonicalImage> {
        self.current.as_ref()
    }

    /// Input for the next transformation.
    pub fn source(&self) -> Option<&CanonicalImage> {
        self.current.as_ref().or(self.original.as_ref())
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn last_error(&self) -> Option<&ErrorDescriptor> {
        self.last_error.as_ref()
    }

    pub fn active_selection(&self) -> Option<&str> {
        self.active_selection.as_deref()
    }

    pub fn custom_instruction(&self) -> Option<&str> {
        self.custom_instruction.as_deref()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn in_flight(&self) -> Option<(Ticket, RequestKind)> {
        self.in_flight.map(|flight| (flight.ticket, flight.kind))
    }

    pub fn phase(&self) -> SessionPhase {
        if self.status == SessionStatus::Pending {
            SessionPhase::Pending
        } else if self.original.is_none() {
            SessionPhase::Empty
        } else if self.current.is_none() {
            SessionPhase::Ready
        } else {
            SessionPhase::Transformed
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase(),
            status: self.status,
            original: self.original.clone(),
            current: self.current.clone(),
            last_error: self.last_error.clone(),
            active_selection: self.active_selection.clone(),
            custom_instruction: self.custom_instruction.clone(),
            generation: self.generation,
        }
    }

    /// Marks the session Pending while a resource is being normalized.
    pub fn begin_load(&mut self) -> Result<Ticket, ValidationError> {
        self.ensure_idle()?;
        Ok(self.dispatch(RequestKind::Load))
    }

    pub fn complete_load(
        &mut self,
        ticket: Ticket,
        result: Result<CanonicalImage, CodecError>,
    ) -> Completion {
        if !self.settle(ticket, RequestKind::Load) {
            return Completion::Stale;
        }
        match result {
            Ok(image) => {
                self.original = Some(image);
                self.current = None;
                self.last_error = None;
                self.active_selection = None;
                self.custom_instruction = None;
                Completion::Applied
            }
            Err(err) => {
                let descriptor = ErrorDescriptor::image_load(&err);
                self.last_error = Some(descriptor.clone());
                Completion::Failed(descriptor)
            }
        }
    }

    /// Synchronous upload: normalize in place and fold the result in.
    pub fn load_image(&mut self, resource: &ImageResource) -> Result<Completion, ValidationError> {
        let ticket = self.begin_load()?;
        Ok(self.complete_load(ticket, normalize(resource)))
    }

    pub fn begin_preset(&mut self, preset_id: &str) -> Result<TransformDispatch, ValidationError> {
        self.ensure_idle()?;
        if self.source().is_none() {
            return Err(ValidationError::NoSourceImage);
        }
        let preset = self
            .catalog
            .get(preset_id)
            .ok_or_else(|| ValidationError::UnknownPreset(preset_id.trim().to_string()))?;
        self.active_selection = Some(preset.id.to_string());
        self.custom_instruction = None;
        let mut dispatch = self.begin_transformation(preset.instruction_text)?;
        dispatch.preset = Some(preset.id);
        Ok(dispatch)
    }

    pub fn begin_custom(&mut self, text: &str) -> Result<TransformDispatch, ValidationError> {
        self.ensure_idle()?;
        let instruction = text.trim();
        if instruction.is_empty() {
            return Err(ValidationError::EmptyInstruction);
        }
        if self.source().is_none() {
            return Err(ValidationError::NoSourceImage);
        }
        self.active_selection = None;
        self.custom_instruction = Some(instruction.to_string());
        self.begin_transformation(instruction)
    }

    fn begin_transformation(
        &mut self,
        instruction: &str,
    ) -> Result<TransformDispatch, ValidationError> {
        self.ensure_idle()?;
        let source = self
            .source()
            .cloned()
            .ok_or(ValidationError::NoSourceImage)?;
        self.last_error = None;
        let ticket = self.dispatch(RequestKind::Transform);
        Ok(TransformDispatch {
            ticket,
            source,
            instruction: instruction.to_string(),
            preset: None,
        })
    }

    pub fn complete_transformation(
        &mut self,
        ticket: Ticket,
        result: Result<CanonicalImage, EngineError>,
    ) -> Completion {
        if !self.settle(ticket, RequestKind::Transform) {
            return Completion::Stale;
        }
        match result {
            Ok(image) => {
                self.current = Some(image);
                self.last_error = None;
                Completion::Applied
            }
            Err(err) => {
                let descriptor = ErrorDescriptor::transformation(&err);
                self.last_error = Some(descriptor.clone());
                Completion::Failed(descriptor)
            }
        }
    }

    /// Drops every transformation. Returns whether anything changed.
    pub fn revert_to_original(&mut self) -> Result<bool, ValidationError> {
        self.ensure_idle()?;
        if self.current.is_none() {
            return Ok(false);
        }
        self.current = None;
        self.last_error = None;
        self.active_selection = None;
        self.custom_instruction = None;
        Ok(true)
    }

    /// Back to Empty. Legal at any time; an in-flight request is abandoned
    /// and its ticket returned so the caller can stop waiting on it.
    pub fn reset(&mut self) -> Option<Ticket> {
        let abandoned = self.in_flight.take().map(|flight| flight.ticket);
        self.original = None;
        self.current = None;
        self.status = SessionStatus::Idle;
        self.last_error = None;
        self.active_selection = None;
        self.custom_instruction = None;
        self.generation += 1;
        abandoned
    }

    fn ensure_idle(&self) -> Result<(), ValidationError> {
        if self.status == SessionStatus::Pending {
            return Err(ValidationError::Busy);
        }
        Ok(())
    }

    fn dispatch(&mut self, kind: RequestKind) -> Ticket {
        self.next_request += 1;
        let ticket = Ticket {
            generation: self.generation,
            request: self.next_request,
        };
        self.in_flight = Some(InFlight { ticket, kind });
        self.status = SessionStatus::Pending;
        ticket
    }

    fn settle(&mut self, ticket: Ticket, kind: RequestKind) -> bool {
        let matches = self
            .in_flight
            .map(|flight| flight.ticket == ticket && flight.kind == kind)
            .unwrap_or(false);
        if matches {
            self.in_flight = None;
            self.status = SessionStatus::Idle;
        }
        matches
    }
}

#[cfg(test)]
mod tests {
    use crate::codec::fixtures::{canonical, png_bytes};
    use crate::codec::{CodecError, ImageResource};
    use crate::errors::{EngineError, ErrorKind, ValidationError};

    use super::*;

    const A: [u8; 3] = [200, 10, 10];
    const B: [u8; 3] = [10, 200, 10];
    const C: [u8; 3] = [10, 10, 200];
    const D: [u8; 3] = [90, 90, 90];

    fn loaded(rgb: [u8; 3]) -> Session {
        let mut session = Session::default();
        let ticket = session.begin_load().unwrap_or_else(|err| panic!("{err}"));
        assert_eq!(
            session.complete_load(ticket, Ok(canonical(rgb))),
            Completion::Applied
        );
        session
    }

    fn succeed(session: &mut Session, dispatch: TransformDispatch, rgb: [u8; 3]) {
        assert_eq!(
            session.complete_transformation(dispatch.ticket, Ok(canonical(rgb))),
            Completion::Applied
        );
    }

    #[test]
    fn new_session_is_empty_and_idle() {
        let session = Session::default();
        assert_eq!(session.phase(), SessionPhase::Empty);
        assert_eq!(session.status(), SessionStatus::Idle);
        assert!(session.snapshot().displayed().is_none());
    }

    #[test]
    fn upload_sets_original_and_leaves_current_absent() {
        let session = loaded(A);
        assert_eq!(session.original(), Some(&canonical(A)));
        assert!(session.current().is_none());
        assert_eq!(session.phase(), SessionPhase::Ready);
        assert_eq!(session.snapshot().displayed(), Some(&canonical(A)));
    }

    #[test]
    fn load_is_pending_until_completed() -> anyhow::Result<()> {
        let mut session = Session::default();
        let ticket = session.begin_load()?;
        assert_eq!(session.phase(), SessionPhase::Pending);
        assert_eq!(session.begin_custom("x").err(), Some(ValidationError::Busy));
        assert_eq!(session.begin_load().err(), Some(ValidationError::Busy));
        session.complete_load(ticket, Ok(canonical(A)));
        assert_eq!(session.status(), SessionStatus::Idle);
        Ok(())
    }

    #[test]
    fn synchronous_load_image_normalizes_resource() -> anyhow::Result<()> {
        let mut session = Session::default();
        let outcome = session.load_image(&ImageResource::from_bytes(
            png_bytes(2, 2, A),
            Some("image/png"),
        ))?;
        assert_eq!(outcome, Completion::Applied);
        assert_eq!(session.original().map(|image| image.mime()), Some("image/png"));
        Ok(())
    }

    #[test]
    fn failed_first_load_stays_empty_with_error() -> anyhow::Result<()> {
        let mut session = Session::default();
        let outcome = session.load_image(&ImageResource::from_bytes(b"nope".to_vec(), None))?;
        assert!(matches!(outcome, Completion::Failed(_)));
        assert_eq!(session.phase(), SessionPhase::Empty);
        assert_eq!(
            session.last_error().map(|error| error.kind),
            Some(ErrorKind::ImageLoad)
        );
        Ok(())
    }

    #[test]
    fn failed_reload_keeps_previous_lineage() -> anyhow::Result<()> {
        let mut session = loaded(A);
        let dispatch = session.begin_preset("sharpen")?;
        succeed(&mut session, dispatch, B);

        let ticket = session.begin_load()?;
        let outcome = session.complete_load(ticket, Err(CodecError::Empty));
        assert!(matches!(outcome, Completion::Failed(_)));
        assert_eq!(session.original(), Some(&canonical(A)));
        assert_eq!(session.current(), Some(&canonical(B)));
        Ok(())
    }

    #[test]
    fn fresh_upload_discards_current_error_and_selection() -> anyhow::Result<()> {
        let mut session = loaded(A);
        let dispatch = session.begin_preset("sharpen")?;
        succeed(&mut session, dispatch, B);
        let dispatch = session.begin_preset("vintage")?;
        session.complete_transformation(dispatch.ticket, Err(EngineError::new("quota")));
        assert!(session.last_error().is_some());

        let ticket = session.begin_load()?;
        session.complete_load(ticket, Ok(canonical(C)));
        assert_eq!(session.original(), Some(&canonical(C)));
        assert!(session.current().is_none());
        assert!(session.last_error().is_none());
        assert!(session.active_selection().is_none());
        Ok(())
    }

    #[test]
    fn chained_edits_then_revert_then_new_preset() -> anyhow::Result<()> {
        let mut session = loaded(A);

        let sharpen = session.begin_preset("sharpen")?;
        assert_eq!(sharpen.source, canonical(A));
        assert_eq!(sharpen.preset, Some("sharpen"));
        succeed(&mut session, sharpen, B);
        assert_eq!(session.current(), Some(&canonical(B)));
        assert_eq!(session.active_selection(), Some("sharpen"));

        let glow = session.begin_custom("  add glow ")?;
        assert_eq!(glow.source, canonical(B));
        assert_eq!(glow.instruction, "add glow");
        assert!(session.active_selection().is_none());
        assert_eq!(session.custom_instruction(), Some("add glow"));
        succeed(&mut session, glow, C);
        assert_eq!(session.current(), Some(&canonical(C)));

        assert!(session.revert_to_original()?);
        assert!(session.current().is_none());
        assert!(session.custom_instruction().is_none());
        assert_eq!(session.snapshot().displayed(), Some(&canonical(A)));
        assert_eq!(
            session.snapshot().displayed().map(|image| image.bytes().ok()),
            session.original().map(|image| image.bytes().ok())
        );

        let grayscale = session.begin_preset("grayscale")?;
        assert_eq!(grayscale.source, canonical(A));
        succeed(&mut session, grayscale, D);
        assert_eq!(session.current(), Some(&canonical(D)));
        assert_eq!(session.original(), Some(&canonical(A)));
        Ok(())
    }

    #[test]
    fn failed_preset_then_retry_succeeds() -> anyhow::Result<()> {
        let mut session = loaded(A);
        let first = session.begin_preset("sharpen")?;
        let outcome =
            session.complete_transformation(first.ticket, Err(EngineError::new("network down")));
        assert!(matches!(outcome, Completion::Failed(ref error) if error.message == "network down"));
        assert!(session.current().is_none());
        assert_eq!(session.status(), SessionStatus::Idle);
        assert_eq!(
            session.last_error().map(|error| error.message.as_str()),
            Some("network down")
        );

        let retry = session.begin_preset("sharpen")?;
        assert!(session.last_error().is_none());
        succeed(&mut session, retry, B);
        assert_eq!(session.current(), Some(&canonical(B)));
        assert!(session.last_error().is_none());
        Ok(())
    }

    #[test]
    fn failed_chained_edit_keeps_earlier_result() -> anyhow::Result<()> {
        let mut session = loaded(A);
        let first = session.begin_preset("sharpen")?;
        succeed(&mut session, first, B);
        let second = session.begin_custom("melt it")?;
        session.complete_transformation(second.ticket, Err(EngineError::new("blocked")));
        assert_eq!(session.current(), Some(&canonical(B)));
        assert_eq!(session.phase(), SessionPhase::Transformed);
        Ok(())
    }

    #[test]
    fn pending_rejects_every_other_mutation_without_side_effects() -> anyhow::Result<()> {
        let mut session = loaded(A);
        let first = session.begin_preset("sharpen")?;
        succeed(&mut session, first, B);
        let failed = session.begin_preset("vintage")?;
        session.complete_transformation(failed.ticket, Err(EngineError::new("boom")));

        let in_flight = session.begin_custom("add glow")?;
        let before = session.snapshot();
        assert_eq!(session.begin_preset("grayscale").err(), Some(ValidationError::Busy));
        assert_eq!(session.begin_custom("again").err(), Some(ValidationError::Busy));
        assert_eq!(session.begin_load().err(), Some(ValidationError::Busy));
        assert_eq!(session.revert_to_original().err(), Some(ValidationError::Busy));
        assert_eq!(session.snapshot(), before);
        assert_eq!(
            session.in_flight().map(|(ticket, _)| ticket),
            Some(in_flight.ticket)
        );
        Ok(())
    }

    #[test]
    fn empty_or_blank_instruction_is_rejected_without_dispatch() {
        let mut session = loaded(A);
        for text in ["", "   ", "\n\t"] {
            assert_eq!(
                session.begin_custom(text).err(),
                Some(ValidationError::EmptyInstruction)
            );
            assert_eq!(session.status(), SessionStatus::Idle);
            assert!(session.in_flight().is_none());
        }
    }

    #[test]
    fn transformations_need_a_source_image() {
        let mut session = Session::default();
        assert_eq!(
            session.begin_preset("sharpen").err(),
            Some(ValidationError::NoSourceImage)
        );
        assert_eq!(
            session.begin_custom("add glow").err(),
            Some(ValidationError::NoSourceImage)
        );
        assert!(session.active_selection().is_none());
        assert_eq!(session.phase(), SessionPhase::Empty);
    }

    #[test]
    fn unknown_preset_changes_nothing() {
        let mut session = loaded(A);
        let before = session.snapshot();
        assert_eq!(
            session.begin_preset("sepia").err(),
            Some(ValidationError::UnknownPreset("sepia".to_string()))
        );
        assert_eq!(session.snapshot(), before);
    }

    #[test]
    fn revert_without_edits_is_a_noop() -> anyhow::Result<()> {
        let mut session = loaded(A);
        let before = session.snapshot();
        assert!(!session.revert_to_original()?);
        assert_eq!(session.snapshot(), before);
        Ok(())
    }

    #[test]
    fn reset_is_idempotent_and_returns_to_empty() -> anyhow::Result<()> {
        let mut session = loaded(A);
        let dispatch = session.begin_preset("sharpen")?;
        succeed(&mut session, dispatch, B);

        assert!(session.reset().is_none());
        let once = session.snapshot();
        assert_eq!(once.phase, SessionPhase::Empty);
        assert!(once.original.is_none() && once.current.is_none());

        session.reset();
        let twice = session.snapshot();
        assert_eq!(twice.phase, SessionPhase::Empty);
        assert_eq!(twice.generation, once.generation + 1);
        Ok(())
    }

    #[test]
    fn reset_while_pending_makes_late_result_stale() -> anyhow::Result<()> {
        let mut session = loaded(A);
        let dispatch = session.begin_preset("sharpen")?;
        assert_eq!(session.reset(), Some(dispatch.ticket));
        assert_eq!(session.status(), SessionStatus::Idle);

        let late = session.complete_transformation(dispatch.ticket, Ok(canonical(B)));
        assert_eq!(late, Completion::Stale);
        assert_eq!(session.phase(), SessionPhase::Empty);
        assert!(session.current().is_none());
        Ok(())
    }

    #[test]
    fn stale_result_does_not_land_on_new_request() -> anyhow::Result<()> {
        let mut session = loaded(A);
        let abandoned = session.begin_preset("sharpen")?;
        session.reset();

        let ticket = session.begin_load()?;
        session.complete_load(ticket, Ok(canonical(C)));
        let fresh = session.begin_custom("add glow")?;
        assert_ne!(fresh.ticket, abandoned.ticket);
        assert_eq!(
            session.complete_transformation(abandoned.ticket, Ok(canonical(B))),
            Completion::Stale
        );
        assert_eq!(session.status(), SessionStatus::Pending);
        succeed(&mut session, fresh, D);
        assert_eq!(session.current(), Some(&canonical(D)));
        Ok(())
    }

    #[test]
    fn completion_kind_must_match_request() -> anyhow::Result<()> {
        let mut session = Session::default();
        let ticket = session.begin_load()?;
        assert_eq!(
            session.complete_transformation(ticket, Ok(canonical(B))),
            Completion::Stale
        );
        assert_eq!(session.status(), SessionStatus::Pending);
        Ok(())
    }
}

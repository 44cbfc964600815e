use glance_contracts::events::EventWriter;
use glance_contracts::turns::{ChatTurn, Role};
use log::warn;
use serde_json::{json, Value};

use crate::error::{DecodeError, ExternalServiceError};
use crate::image_input::{ingest_image, UploadLimits, UploadedImage};
use crate::prompt::build_prompt;
use crate::providers::VisionModel;
use crate::session::SessionState;

/// The surface that paints session state. The controller calls it after
/// every change; it never reads state on its own.
pub trait Renderer {
    fn turn_appended(&mut self, turn: &ChatTurn);
    /// Busy indicator around a model call.
    fn busy(&mut self, active: bool);
    fn image_preview(&mut self, image: &UploadedImage);
    /// Transient message that is shown but never stored in the transcript.
    fn notify_error(&mut self, message: &str);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    AwaitingInput,
    Processing,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Submission {
    /// Blank input; nothing was recorded.
    Ignored,
    Answered(ChatTurn),
    /// The question stays in the transcript without an answer.
    Failed(ExternalServiceError),
}

pub struct ConversationController<M: VisionModel> {
    model: M,
    limits: UploadLimits,
    events: Option<EventWriter>,
    phase: Phase,
}

impl<M: VisionModel> ConversationController<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            limits: UploadLimits::default(),
            events: None,
            phase: Phase::AwaitingInput,
        }
    }

    pub fn with_limits(mut self, limits: UploadLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn limits(&self) -> &UploadLimits {
        &self.limits
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn start(&self, session: &SessionState) {
        self.emit(
            "session_started",
            json!({
                "provider": self.model.name(),
                "model": self.model.model_id(),
                "started_at": session.started_at(),
            }),
        );
    }

    pub fn finish(&self, session: &SessionState) {
        self.emit(
            "session_finished",
            json!({
                "turns": session.len(),
                "has_image": session.image().is_some(),
            }),
        );
    }

    /// Handles one question. The user turn is recorded before the model is
    /// called so it survives a failed call.
    pub fn submit(
        &mut self,
        session: &mut SessionState,
        question: &str,
        renderer: &mut dyn Renderer,
    ) -> Submission {
        if question.trim().is_empty() {
            return Submission::Ignored;
        }

        let index = session.len();
        let turn = session.append_turn(Role::User, question);
        self.publish_turn(turn, index, renderer);

        self.phase = Phase::Processing;
        renderer.busy(true);
        let result = {
            let prompt = build_prompt(question, session.image());
            let parts = prompt.parts();
            self.emit(
                "generation_started",
                json!({
                    "provider": self.model.name(),
                    "model": self.model.model_id(),
                    "parts": parts.len(),
                    "has_image": prompt.image().is_some(),
                }),
            );
            self.model.generate(&parts)
        };
        renderer.busy(false);
        self.phase = Phase::AwaitingInput;

        match result {
            Ok(answer) => {
                let index = session.len();
                let turn = session.append_turn(Role::Assistant, answer).clone();
                self.publish_turn(&turn, index, renderer);
                Submission::Answered(turn)
            }
            Err(err) => {
                renderer.notify_error(&format!("An error occurred: {err}"));
                self.emit(
                    "generation_failed",
                    json!({
                        "provider": self.model.name(),
                        "error": err.message(),
                    }),
                );
                Submission::Failed(err)
            }
        }
    }

    /// Decodes an upload into the session image. A rejected upload leaves the
    /// session untouched.
    pub fn upload(
        &mut self,
        session: &mut SessionState,
        name: &str,
        bytes: &[u8],
        renderer: &mut dyn Renderer,
    ) -> Result<(), DecodeError> {
        let image = ingest_image(name, bytes, &self.limits)
            .map_err(|err| self.reject(name, bytes.len() as u64, err, renderer))?;

        let mut payload = json!({
            "name": image.name(),
            "format": image.kind().to_string(),
            "width": image.width(),
            "height": image.height(),
            "bytes": image.byte_len(),
            "sha256": image.sha256(),
        });
        let replaced = session.set_image(image);
        payload["replaced"] = Value::Bool(replaced.is_some());
        self.emit("image_uploaded", payload);

        if let Some(image) = session.image() {
            renderer.image_preview(image);
        }
        Ok(())
    }

    /// Rejects an upload from its size alone, before any of it is read.
    /// Callers that stream uploads from disk check here first.
    pub fn check_upload_size(
        &self,
        name: &str,
        size: u64,
        renderer: &mut dyn Renderer,
    ) -> Result<(), DecodeError> {
        let limit = self.limits.max_bytes;
        if size <= limit as u64 {
            return Ok(());
        }
        let err = DecodeError::TooLarge {
            size: usize::try_from(size).unwrap_or(usize::MAX),
            limit,
        };
        Err(self.reject(name, size, err, renderer))
    }

    fn reject(
        &self,
        name: &str,
        size: u64,
        err: DecodeError,
        renderer: &mut dyn Renderer,
    ) -> DecodeError {
        renderer.notify_error(&format!("Upload failed: {err}"));
        self.emit(
            "image_rejected",
            json!({
                "name": name,
                "bytes": size,
                "error": err.to_string(),
            }),
        );
        err
    }

    fn publish_turn(&self, turn: &ChatTurn, index: usize, renderer: &mut dyn Renderer) {
        renderer.turn_appended(turn);
        self.emit(
            "turn_appended",
            json!({
                "role": turn.role(),
                "index": index,
                "chars": turn.content().chars().count(),
                "created_at": turn.created_at(),
            }),
        );
    }

    fn emit(&self, event_type: &str, payload: Value) {
        let Some(events) = self.events.as_ref() else {
            return;
        };
        if let Err(err) = events.emit(event_type, payload) {
            warn!("failed to record {event_type} event: {err:#}");
        }
    }
}

//! Session engine for asking questions about an uploaded image.
//!
//! A [`SessionState`] holds the transcript and the current image; the
//! [`ConversationController`] drives uploads and questions against a
//! [`VisionModel`] and reports every change to a [`Renderer`].

mod conversation;
mod error;
mod image_input;
mod prompt;
mod providers;
mod session;

pub use conversation::{ConversationController, Phase, Renderer, Submission};
pub use error::{DecodeError, ExternalServiceError};
pub use image_input::{
    ingest_image, ImageKind, UploadLimits, UploadedImage, DEFAULT_MAX_DIMENSION,
    DEFAULT_MAX_UPLOAD_BYTES,
};
pub use prompt::{build_prompt, image_question_instruction, Prompt, PromptPart};
pub use providers::{
    default_model_registry, DryrunModel, GeminiConfig, GeminiModel, VisionModel,
    VisionModelRegistry, DEFAULT_GEMINI_MODEL,
};
pub use session::SessionState;

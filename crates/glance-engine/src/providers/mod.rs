use std::collections::BTreeMap;

use crate::error::ExternalServiceError;
use crate::prompt::PromptPart;

mod dryrun;
mod gemini;

pub use dryrun::DryrunModel;
pub use gemini::{GeminiConfig, GeminiModel, DEFAULT_GEMINI_MODEL};

/// A hosted (or stand-in) model that answers an ordered list of text and
/// image parts with text.
pub trait VisionModel: Send + Sync {
    fn name(&self) -> &str;
    fn model_id(&self) -> &str;
    fn generate(&self, parts: &[PromptPart<'_>]) -> Result<String, ExternalServiceError>;
}

impl<M: VisionModel + ?Sized> VisionModel for Box<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn model_id(&self) -> &str {
        (**self).model_id()
    }

    fn generate(&self, parts: &[PromptPart<'_>]) -> Result<String, ExternalServiceError> {
        (**self).generate(parts)
    }
}

#[derive(Default)]
pub struct VisionModelRegistry {
    models: BTreeMap<String, Box<dyn VisionModel>>,
}

impl VisionModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<M: VisionModel + 'static>(&mut self, model: M) {
        self.models.insert(model.name().to_string(), Box::new(model));
    }

    pub fn get(&self, name: &str) -> Option<&dyn VisionModel> {
        self.models.get(name).map(|model| model.as_ref())
    }

    /// Removes and returns the named provider so a session can own it.
    pub fn take(&mut self, name: &str) -> Option<Box<dyn VisionModel>> {
        self.models.remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        self.models.keys().cloned().collect()
    }
}

pub fn default_model_registry(gemini: GeminiConfig) -> VisionModelRegistry {
    let mut models = VisionModelRegistry::new();
    models.register(DryrunModel::new());
    models.register(GeminiModel::new(gemini));
    models
}

use super::VisionModel;
use crate::error::ExternalServiceError;
use crate::prompt::PromptPart;

/// Offline stand-in that describes what it was sent instead of calling out.
#[derive(Debug, Clone, Default)]
pub struct DryrunModel;

impl DryrunModel {
    pub fn new() -> Self {
        Self
    }
}

impl VisionModel for DryrunModel {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn model_id(&self) -> &str {
        "dryrun-vision-1"
    }

    fn generate(&self, parts: &[PromptPart<'_>]) -> Result<String, ExternalServiceError> {
        let mut lines = Vec::new();
        for part in parts {
            match part {
                PromptPart::Text(text) => {
                    lines.push(format!("> {}", text.lines().next().unwrap_or_default()))
                }
                PromptPart::Image(image) => lines.push(format!(
                    "- image `{}`: {}x{} {}",
                    image.name(),
                    image.width(),
                    image.height(),
                    image.kind()
                )),
            }
        }
        Ok(format!("**Dryrun reply**\n\n{}", lines.join("\n")))
    }
}

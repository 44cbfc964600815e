use crate::image_input::UploadedImage;

/// One element of the payload sent to the model, in order.
#[derive(Debug, Clone, Copy)]
pub enum PromptPart<'a> {
    Text(&'a str),
    Image(&'a UploadedImage),
}

impl<'a> PromptPart<'a> {
    pub fn as_text(&self) -> Option<&'a str> {
        match self {
            PromptPart::Text(text) => Some(text),
            PromptPart::Image(_) => None,
        }
    }

    pub fn as_image(&self) -> Option<&'a UploadedImage> {
        match self {
            PromptPart::Text(_) => None,
            PromptPart::Image(image) => Some(image),
        }
    }
}

/// Owned prompt: the instruction text plus the optional image it refers to.
///
/// Kept separate from [`PromptPart`] so the interpolated template has an
/// owner for the duration of the request.
#[derive(Debug, Clone)]
pub struct Prompt<'a> {
    text: String,
    image: Option<&'a UploadedImage>,
}

impl<'a> Prompt<'a> {
    pub fn parts(&self) -> Vec<PromptPart<'_>> {
        let mut parts = vec![PromptPart::Text(self.text.as_str())];
        if let Some(image) = self.image {
            parts.push(PromptPart::Image(image));
        }
        parts
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn image(&self) -> Option<&'a UploadedImage> {
        self.image
    }
}

pub fn image_question_instruction(question: &str) -> String {
    format!(
        "You have been given an image along with a specific question from the user. \
         The user's question is: \"{question}\". \
         Carefully analyze the provided image to extract any relevant information needed to answer the question. \
         If the information needed to answer the question is not available in the image, \
         respond accordingly without making up an answer. \
         Ask the user for more context or indicate that the information is not present in the image. \
         Your response should be clear and concise, relying solely on the context provided by the image. \
         Please return the answer formatted in markdown, \
         and do not include any additional information outside of this answer format."
    )
}

/// Without an image the question goes out verbatim as the only part; with
/// one it is wrapped in the image instruction and followed by the image.
pub fn build_prompt<'a>(question: &str, image: Option<&'a UploadedImage>) -> Prompt<'a> {
    match image {
        None => Prompt {
            text: question.to_string(),
            image: None,
        },
        Some(image) => Prompt {
            text: image_question_instruction(question),
            image: Some(image),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{build_prompt, image_question_instruction, PromptPart};
    use crate::image_input::{fixtures, ingest_image, UploadLimits};

    #[test]
    fn text_only_prompt_is_the_question_verbatim() {
        let prompt = build_prompt("Hello", None);
        let parts = prompt.parts();
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].as_text(), Some("Hello"));

        let odd = "  spaced \"quoted\" {braces}  ";
        assert_eq!(build_prompt(odd, None).parts()[0].as_text(), Some(odd));
    }

    #[test]
    fn image_prompt_is_instruction_then_image() -> anyhow::Result<()> {
        let image = ingest_image("menu.png", &fixtures::png(3, 3), &UploadLimits::default())?;
        let question = "What is the restaurant name?";
        let prompt = build_prompt(question, Some(&image));
        let parts = prompt.parts();

        assert_eq!(parts.len(), 2);
        let text = parts[0].as_text().unwrap_or_default();
        assert!(text.contains("\"What is the restaurant name?\""));
        assert_eq!(text, image_question_instruction(question));
        assert!(matches!(parts[1], PromptPart::Image(found) if std::ptr::eq(found, &image)));
        Ok(())
    }

    #[test]
    fn instruction_constrains_the_answer() {
        let text = image_question_instruction("q");
        assert!(text.contains("without making up an answer"));
        assert!(text.contains("not present in the image"));
        assert!(text.contains("formatted in markdown"));
        assert!(!text.contains("  "), "instruction should be single-spaced");
    }

    #[test]
    fn building_twice_gives_the_same_prompt() -> anyhow::Result<()> {
        let image = ingest_image("menu.jpg", &fixtures::jpeg(2, 2), &UploadLimits::default())?;
        let first = build_prompt("Total?", Some(&image));
        let second = build_prompt("Total?", Some(&image));
        assert_eq!(first.text(), second.text());
        assert_eq!(first.parts().len(), second.parts().len());
        Ok(())
    }
}

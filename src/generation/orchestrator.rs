//! Prompt construction and the final answer call

use super::{ContentPart, GenerationError, GenerationProvider, GenerationRequest, Message};
use crate::content::ImageUnit;
use crate::retrieval::AssembledContext;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const SYSTEM_PROMPT: &str =
    "You are a helpful assistant that answers questions based on document context.";
const DESCRIBE_PROMPT: &str = "Describe this image in detail:";

/// Model parameters for both answer and description calls
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f32,
    pub describe_max_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            max_tokens: 2000,
            temperature: 0.3,
            describe_max_tokens: 300,
        }
    }
}

/// The three outputs of a query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub answer: String,
    /// Bodies of the retrieved text units, nearest first
    pub text_context: Vec<String>,
    /// Transport strings of the images sent to the model
    pub image_context: Vec<String>,
}

/// Single-image description request
pub fn describe_request(image: &ImageUnit, settings: &GenerationSettings) -> GenerationRequest {
    GenerationRequest {
        model: settings.model.clone(),
        messages: vec![Message::user(vec![
            ContentPart::text(DESCRIBE_PROMPT),
            ContentPart::image(image.transport()),
        ])],
        max_tokens: settings.describe_max_tokens,
        temperature: None,
    }
}

/// Builds the structured prompt and asks the model once
pub struct Orchestrator {
    generator: Arc<dyn GenerationProvider>,
    settings: GenerationSettings,
}

impl Orchestrator {
    pub fn new(generator: Arc<dyn GenerationProvider>, settings: GenerationSettings) -> Self {
        Self {
            generator,
            settings,
        }
    }

    /// System framing, optional text and image-description blocks, one message
    /// per image, then the question.
    pub fn build_prompt(question: &str, context: &AssembledContext) -> Vec<Message> {
        let mut messages = vec![Message::system(SYSTEM_PROMPT)];

        let context_text = context.context_text();
        if !context_text.is_empty() {
            messages.push(Message::user(vec![
                ContentPart::text("Document context:"),
                ContentPart::text(context_text),
            ]));
        }

        if !context.images.is_empty() {
            let descriptions = context
                .images
                .iter()
                .map(|img| {
                    format!(
                        "Image from {} page {}: {}",
                        img.image.source.source_file, img.image.source.page, img.description
                    )
                })
                .collect::<Vec<_>>()
                .join("\n");

            messages.push(Message::user(vec![
                ContentPart::text("Image context:"),
                ContentPart::text(descriptions),
            ]));
        }

        for img in &context.images {
            messages.push(Message::user(vec![ContentPart::image(img.image.transport())]));
        }

        messages.push(Message::user(vec![ContentPart::text(format!(
            "Question: {}",
            question
        ))]));

        messages
    }

    pub async fn answer(
        &self,
        question: &str,
        context: &AssembledContext,
    ) -> Result<QueryAnswer, GenerationError> {
        let request = GenerationRequest {
            model: self.settings.model.clone(),
            messages: Self::build_prompt(question, context),
            max_tokens: self.settings.max_tokens,
            temperature: Some(self.settings.temperature),
        };

        let answer = self.generator.generate(request).await?;

        Ok(QueryAnswer {
            answer,
            text_context: context.texts.iter().map(|t| t.body.clone()).collect(),
            image_context: context.images.iter().map(|i| i.image.transport()).collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{ImageId, SourceRef, TextUnit};
    use crate::generation::MessageContent;
    use crate::retrieval::SelectedImage;

    fn image() -> Arc<ImageUnit> {
        Arc::new(ImageUnit {
            source: SourceRef::new("test.pdf", 1, 0),
            pixel_data: vec![7, 7],
            dimensions: (2, 1),
        })
    }

    #[test]
    fn test_prompt_with_text_and_image() {
        let img = image();
        let context = AssembledContext {
            texts: vec![
                TextUnit::new(SourceRef::new("test.pdf", 0, 0), "first"),
                TextUnit::new(SourceRef::new("test.pdf", 0, 1), "second"),
            ],
            images: vec![SelectedImage {
                id: ImageId::new("test.pdf", 1, 0),
                image: img.clone(),
                description: "a chart".to_string(),
            }],
        };

        let messages = Orchestrator::build_prompt("What is shown?", &context);
        assert_eq!(messages.len(), 5);
        assert_eq!(messages[0].content, MessageContent::Text(SYSTEM_PROMPT.to_string()));
        assert_eq!(messages[1].text(), "Document context:\nfirst\n\nsecond");
        assert_eq!(
            messages[2].text(),
            "Image context:\nImage from test.pdf page 1: a chart"
        );
        assert_eq!(
            messages[3].content,
            MessageContent::Parts(vec![ContentPart::image(img.transport())])
        );
        assert_eq!(messages[4].text(), "Question: What is shown?");
    }

    #[test]
    fn test_prompt_without_context() {
        let messages = Orchestrator::build_prompt("Anything?", &AssembledContext::default());
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].text(), "Question: Anything?");
    }

    #[test]
    fn test_describe_request() {
        let settings = GenerationSettings::default();
        let request = describe_request(&image(), &settings);
        assert_eq!(request.max_tokens, 300);
        assert!(request.temperature.is_none());
        assert!(request.messages[0].text().contains(DESCRIBE_PROMPT));
    }
}

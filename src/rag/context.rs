// Context assembly and prompt strategies for augmented turns
use serde::{Deserialize, Serialize};

use crate::memory::vector_db::StoredPoint;
use crate::rag::fusion::MergedHit;
use crate::types::{ChatMessage, Message, Role};

/// Context assembly configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Maximum estimated tokens of retrieved context
    pub max_context_tokens: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 2000,
        }
    }
}

/// Retrieved passages formatted for the system prompt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssembledContext {
    pub text: String,
    pub document_count: usize,
    pub estimated_tokens: usize,
    pub document_ids: Vec<String>,
}

impl AssembledContext {
    pub fn is_empty(&self) -> bool {
        self.document_count == 0
    }
}

pub struct ContextBuilder {
    config: ContextConfig,
}

impl ContextBuilder {
    pub fn new() -> Self {
        Self {
            config: ContextConfig::default(),
        }
    }

    pub fn with_config(config: ContextConfig) -> Self {
        Self { config }
    }

    /// Number the hits as `[Source n] text`, stopping at the token budget
    pub fn build(&self, hits: &[MergedHit]) -> AssembledContext {
        let mut parts = Vec::new();
        let mut total_tokens = 0;
        let mut ids = Vec::new();

        for hit in hits {
            // ~4 chars per token
            let tokens = hit.text.chars().count() / 4;
            if total_tokens + tokens > self.config.max_context_tokens {
                break;
            }
            parts.push(format!("[Source {}] {}", parts.len() + 1, hit.text.trim()));
            total_tokens += tokens;
            ids.push(hit.point_id.clone());
        }

        AssembledContext {
            text: parts.join("\n\n"),
            document_count: parts.len(),
            estimated_tokens: total_tokens,
            document_ids: ids,
        }
    }

    /// Full text of one document, passages in the given order, no budget
    pub fn whole_document(&self, passages: &[StoredPoint]) -> AssembledContext {
        let text = passages
            .iter()
            .map(|p| p.text.trim())
            .collect::<Vec<_>>()
            .join("\n\n");

        AssembledContext {
            estimated_tokens: text.chars().count() / 4,
            text,
            document_count: passages.len(),
            document_ids: passages.iter().map(|p| p.id.clone()).collect(),
        }
    }
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// System prompts used by the pipeline
#[derive(Debug, Clone, Default)]
pub struct PromptTemplates;

impl PromptTemplates {
    /// Seed prompt stored as the first message of every new session
    pub fn general_assistant(&self) -> String {
        "You are a helpful assistant. Answer clearly and concisely.".to_string()
    }

    /// Analyst prompt wrapping retrieved material
    pub fn analyst(&self, context: Option<&str>) -> String {
        let context = match context {
            Some(c) if !c.trim().is_empty() => c,
            _ => "No relevant material was retrieved for this question.",
        };
        format!(
            "You are a careful analyst. Answer using the sources below.\n\n\
             Available sources:\n{}\n\n\
             Rules:\n\
             1. When sources are relevant, cite them as [Source n].\n\
             2. When they are not, say the material cannot confirm an answer, then give a clearly labelled analysis from general knowledge.\n\
             3. Do not mix unstated assumptions into cited material.",
            context
        )
    }

    /// Summary prompt, followed by the retrieved material when present
    pub fn summary(&self, context: Option<&str>) -> String {
        let mut prompt = String::from(
            "You are a summarization expert. Produce a summary that keeps the main points and key details of the source.\n\
             Start with a \"Summary\" heading, use paragraphs, and list key points as bullets.\n\
             Do not add content the source does not contain and do not add opinions.",
        );
        if let Some(c) = context.filter(|c| !c.trim().is_empty()) {
            prompt.push_str("\n\nSource material:\n");
            prompt.push_str(c);
        }
        prompt
    }

    /// Article writer prompt; the user's prompt follows as the only message
    pub fn article_writer(&self) -> String {
        "You are a professional English article writer. Generate a well-structured article based on the user's prompt.\n\
         Requirements:\n\
         - Write all content in English\n\
         - Use a formal and coherent structure\n\
         - Include an introduction, body paragraphs and a conclusion\n\
         - Use proper grammar and academic vocabulary"
            .to_string()
    }
}

/// What kind of turn is being answered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TurnKind {
    /// A user question
    Chat { message: String },
    /// Summarize the whole target document; carries no user message
    Summary,
    /// Write an article from a prompt; no history is read or stored
    Article { prompt: String },
}

impl TurnKind {
    /// Text used for similarity retrieval. Summaries read the whole
    /// document instead and articles retrieve nothing.
    pub fn query(&self) -> Option<&str> {
        match self {
            TurnKind::Chat { message } => Some(message),
            TurnKind::Summary | TurnKind::Article { .. } => None,
        }
    }

    /// User message sent with the turn, if any
    pub fn user_message(&self) -> Option<&str> {
        match self {
            TurnKind::Chat { message } => Some(message),
            TurnKind::Summary => None,
            TurnKind::Article { prompt } => Some(prompt),
        }
    }

    /// Turns that neither load nor save a session
    pub fn is_stateless(&self) -> bool {
        matches!(self, TurnKind::Article { .. })
    }

    pub fn system_prompt(&self, templates: &PromptTemplates, context: &AssembledContext) -> String {
        let context = (!context.is_empty()).then_some(context.text.as_str());
        match self {
            TurnKind::Chat { .. } => templates.analyst(context),
            TurnKind::Summary => templates.summary(context),
            TurnKind::Article { .. } => templates.article_writer(),
        }
    }
}

/// `[system(prompt), ...history]` with stored system messages removed
pub fn augment(system_prompt: String, history: &[Message]) -> Vec<ChatMessage> {
    std::iter::once(ChatMessage::system(system_prompt))
        .chain(
            history
                .iter()
                .filter(|m| m.role != Role::System)
                .map(Message::to_chat),
        )
        .collect()
}

//! Prompt assembly for generation and synthesis requests

use serde::{Deserialize, Serialize};

use crate::types::{ProviderKind, Requirement, SimilarMatch};

/// Maximum historical examples quoted in a generation prompt
pub const MAX_PROMPT_EXAMPLES: usize = 3;

const DEFAULT_DOMAIN: &str = "Wealth Management Software";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Provider-neutral prompt: a system instruction plus conversation turns.
///
/// Adapters decide how the system text travels (first chat message or a
/// dedicated field).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub messages: Vec<ChatMessage>,
}

impl Prompt {
    pub fn new(system: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            messages: Vec::new(),
        }
    }

    pub fn with_user(mut self, content: impl Into<String>) -> Self {
        self.messages.push(ChatMessage::user(content));
        self
    }

    /// Total characters across system and messages
    pub fn char_len(&self) -> usize {
        self.system.len() + self.messages.iter().map(|m| m.content.len()).sum::<usize>()
    }
}

/// Builds generation and synthesis prompts
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    domain: String,
    max_examples: usize,
}

impl Default for PromptBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptBuilder {
    pub fn new() -> Self {
        Self {
            domain: DEFAULT_DOMAIN.to_string(),
            max_examples: MAX_PROMPT_EXAMPLES,
        }
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into();
        self
    }

    pub fn with_max_examples(mut self, max_examples: usize) -> Self {
        self.max_examples = max_examples;
        self
    }

    /// Prompt asking one provider to answer `requirement`
    pub fn requirement_prompt(&self, requirement: &Requirement, similar: &[SimilarMatch]) -> Prompt {
        let category = if requirement.category.trim().is_empty() {
            "General"
        } else {
            requirement.category.as_str()
        };

        let system = format!(
            "You are a senior RFP specialist for {domain}.\n\
             Requirement category: {category}.\n\n\
             Write a complete, submission-ready answer to the requirement. \
             Reuse material from the previous answers where relevant, preferring \
             higher similarity scores. Keep it professional and concise (200-400 words). \
             Do not add meta-commentary, salutations or signatures.",
            domain = self.domain,
            category = category,
        );

        let user = format!(
            "Previous answers:\n{examples}\nRequirement: {text}",
            examples = self.format_examples(similar),
            text = requirement.text,
        );

        Prompt::new(system).with_user(user)
    }

    /// Prompt asking the synthesizer to merge several provider answers
    pub fn synthesis_prompt(
        &self,
        requirement: &Requirement,
        answers: &[(ProviderKind, &str)],
        similar: &[SimilarMatch],
    ) -> Prompt {
        let system = format!(
            "You are a senior RFP specialist for {domain}. Several drafts answer the \
             same requirement. Merge them into one answer that keeps every accurate, \
             specific capability, drops repetition, and reads as a single voice. \
             Stay consistent with the historical answers provided. Output only the \
             final answer text.",
            domain = self.domain,
        );

        let drafts = answers
            .iter()
            .map(|(provider, text)| format!("{} draft:\n{}", provider.display_name(), text))
            .collect::<Vec<_>>()
            .join("\n\n");

        let user = format!(
            "Requirement: {text}\n\nDrafts:\n{drafts}\n\nHistorical answers:\n{examples}",
            text = requirement.text,
            drafts = drafts,
            examples = self.format_examples(similar),
        );

        Prompt::new(system).with_user(user)
    }

    fn format_examples(&self, similar: &[SimilarMatch]) -> String {
        if similar.is_empty() || self.max_examples == 0 {
            return "None available. Answer from general expertise.\n".to_string();
        }

        let mut ranked: Vec<&SimilarMatch> = similar.iter().collect();
        ranked.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        ranked
            .into_iter()
            .take(self.max_examples)
            .enumerate()
            .map(|(i, m)| {
                format!(
                    "[Example {}] (similarity: {:.2})\nRequirement: {}\nAnswer: {}\n",
                    i + 1,
                    m.score,
                    m.requirement,
                    m.response
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn similar(score: f32, response: &str) -> SimilarMatch {
        SimilarMatch {
            record_id: Uuid::new_v4(),
            requirement: "Past requirement".to_string(),
            response: response.to_string(),
            category: "Reporting".to_string(),
            score,
            reference: "Response #1".to_string(),
        }
    }

    #[test]
    fn test_requirement_prompt_includes_text_and_category() {
        let req = Requirement::new(1, "Reporting", "Describe the reporting engine");
        let prompt = PromptBuilder::new().requirement_prompt(&req, &[]);
        assert!(prompt.system.contains("Reporting"));
        assert_eq!(prompt.messages.len(), 1);
        assert!(prompt.messages[0].content.contains("Describe the reporting engine"));
        assert!(prompt.messages[0].content.contains("None available"));
    }

    #[test]
    fn test_examples_limited_and_ordered() {
        let req = Requirement::new(1, "Reporting", "q");
        let matches = vec![
            similar(0.40, "low"),
            similar(0.95, "top"),
            similar(0.70, "mid"),
            similar(0.60, "fourth"),
        ];
        let prompt = PromptBuilder::new().requirement_prompt(&req, &matches);
        let body = &prompt.messages[0].content;

        assert!(body.contains("(similarity: 0.95)"));
        assert!(!body.contains("Answer: low"));
        let top = body.find("Answer: top").unwrap();
        let mid = body.find("Answer: mid").unwrap();
        assert!(top < mid);
    }

    #[test]
    fn test_synthesis_prompt_labels_each_draft() {
        let req = Requirement::new(2, "Security", "Describe encryption at rest");
        let prompt = PromptBuilder::new().synthesis_prompt(
            &req,
            &[
                (ProviderKind::OpenAi, "AES-256 everywhere."),
                (ProviderKind::Anthropic, "Keys rotate yearly."),
            ],
            &[similar(0.8, "Historic")],
        );
        let body = &prompt.messages[0].content;
        assert!(body.contains("OpenAI draft:\nAES-256 everywhere."));
        assert!(body.contains("Anthropic draft:\nKeys rotate yearly."));
        assert!(body.contains("Answer: Historic"));
    }
}

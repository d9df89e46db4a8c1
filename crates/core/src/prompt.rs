use crate::context::ContextBlob;
use crate::error::ConfigError;

pub const FALLBACK_ANSWER: &str = "I don't have enough information in the documents";

pub const DEFAULT_TEMPLATE: &str = r#"You are a helpful assistant answering questions based **only** on the provided context.
If the information is not in the context, say "I don't have enough information in the documents".

Context:
{context}

Question: {question}

Answer concisely, clearly and naturally:"#;

const CONTEXT_SLOT: &str = "{context}";
const QUESTION_SLOT: &str = "{question}";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Context,
    Question,
}

/// A prompt template parsed once into literal text and slots, so rendered
/// values are never scanned for placeholders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

impl PromptTemplate {
    /// Both `{context}` and `{question}` must occur exactly once.
    pub fn parse(template: &str) -> Result<Self, ConfigError> {
        for slot in [CONTEXT_SLOT, QUESTION_SLOT] {
            let count = template.matches(slot).count();
            if count != 1 {
                return Err(ConfigError::Template(format!(
                    "expected {slot} exactly once, found {count}"
                )));
            }
        }

        let mut segments = Vec::new();
        let mut rest = template;
        while !rest.is_empty() {
            let next = [CONTEXT_SLOT, QUESTION_SLOT]
                .into_iter()
                .filter_map(|slot| rest.find(slot).map(|at| (at, slot)))
                .min_by_key(|(at, _)| *at);

            match next {
                Some((at, slot)) => {
                    if at > 0 {
                        segments.push(Segment::Literal(rest[..at].to_string()));
                    }
                    segments.push(if slot == CONTEXT_SLOT {
                        Segment::Context
                    } else {
                        Segment::Question
                    });
                    rest = &rest[at + slot.len()..];
                }
                None => {
                    segments.push(Segment::Literal(rest.to_string()));
                    rest = "";
                }
            }
        }

        Ok(Self { segments })
    }

    pub fn render(&self, context: &ContextBlob, question: &str) -> String {
        let mut prompt = String::with_capacity(self.literal_len() + context.len() + question.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => prompt.push_str(text),
                Segment::Context => prompt.push_str(context.as_str()),
                Segment::Question => prompt.push_str(question),
            }
        }
        prompt
    }

    fn literal_len(&self) -> usize {
        self.segments
            .iter()
            .map(|segment| match segment {
                Segment::Literal(text) => text.len(),
                _ => 0,
            })
            .sum()
    }
}

impl Default for PromptTemplate {
    fn default() -> Self {
        let (preamble, rest) = DEFAULT_TEMPLATE
            .split_once(CONTEXT_SLOT)
            .unwrap_or((DEFAULT_TEMPLATE, ""));
        let (between, closing) = rest.split_once(QUESTION_SLOT).unwrap_or((rest, ""));

        Self {
            segments: vec![
                Segment::Literal(preamble.to_string()),
                Segment::Context,
                Segment::Literal(between.to_string()),
                Segment::Question,
                Segment::Literal(closing.to_string()),
            ],
        }
    }
}

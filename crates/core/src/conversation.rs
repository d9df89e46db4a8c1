use crate::context::ContextBlob;
use crate::error::{GenerationError, TurnError};
use crate::models::Message;
use crate::prompt::PromptTemplate;
use crate::traits::CompletionClient;
use futures::StreamExt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Progress of the current turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TurnState {
    #[default]
    Idle,
    AwaitingFirstFragment,
    Streaming,
    Finalized,
}

#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
}

impl Transcript {
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    fn clear(&mut self) {
        self.messages.clear();
    }
}

/// Passed to the display callback for every fragment.
#[derive(Debug, Clone, Copy)]
pub struct FragmentUpdate<'a> {
    pub fragment: &'a str,
    pub answer_so_far: &'a str,
}

/// The shared pieces every turn needs: one LLM client and one template.
pub struct QuestionAnswerer {
    client: Arc<dyn CompletionClient>,
    template: PromptTemplate,
}

impl QuestionAnswerer {
    pub fn new(client: Arc<dyn CompletionClient>, template: PromptTemplate) -> Self {
        Self { client, template }
    }

    pub fn build_prompt(&self, context: &ContextBlob, question: &str) -> String {
        self.template.render(context, question)
    }
}

/// Transcript and turn state of one session.
#[derive(Debug, Default)]
pub struct Conversation {
    transcript: Transcript,
    state: TurnState,
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Runs one turn. On success the transcript gains the question and the
    /// answer; on failure it keeps only the question and the error carries
    /// whatever text had already streamed.
    pub async fn ask<F>(
        &mut self,
        answerer: &QuestionAnswerer,
        context: &ContextBlob,
        question: &str,
        mut on_fragment: F,
    ) -> Result<String, TurnError>
    where
        F: FnMut(FragmentUpdate<'_>) + Send,
    {
        self.transcript.push(Message::user(question));
        self.state = TurnState::AwaitingFirstFragment;

        let prompt = answerer.build_prompt(context, question);
        debug!(prompt_bytes = prompt.len(), "prompt built");

        let mut answer = String::new();
        match self
            .drain(answerer, &prompt, &mut answer, &mut on_fragment)
            .await
        {
            Ok(()) => {
                info!(answer_bytes = answer.len(), "turn finalized");
                self.transcript.push(Message::assistant(answer.clone()));
                self.state = TurnState::Finalized;
                Ok(answer)
            }
            Err(source) => {
                warn!(
                    error = %source,
                    partial_bytes = answer.len(),
                    state = ?self.state,
                    "turn failed"
                );
                self.state = TurnState::Idle;
                Err(TurnError {
                    partial: answer,
                    source,
                })
            }
        }
    }

    async fn drain<F>(
        &mut self,
        answerer: &QuestionAnswerer,
        prompt: &str,
        answer: &mut String,
        on_fragment: &mut F,
    ) -> Result<(), GenerationError>
    where
        F: FnMut(FragmentUpdate<'_>) + Send,
    {
        let mut fragments = answerer.client.stream(prompt).await?;

        while let Some(fragment) = fragments.next().await {
            let fragment = fragment?;
            self.state = TurnState::Streaming;
            answer.push_str(&fragment);
            on_fragment(FragmentUpdate {
                fragment: &fragment,
                answer_so_far: answer.as_str(),
            });
        }

        Ok(())
    }

    /// Drops every message and returns to [`TurnState::Idle`].
    pub fn reset(&mut self) {
        debug!(dropped = self.transcript.len(), "transcript reset");
        self.transcript.clear();
        self.state = TurnState::Idle;
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::Role;
    use crate::traits::FragmentStream;
    use crate::{assemble_context, DocumentSet, PageRecord};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::Mutex;

    /// Replays fixed fragments, optionally failing after `fail_after` of them.
    #[derive(Default)]
    pub(crate) struct ScriptedClient {
        pub fragments: Vec<&'static str>,
        pub fail_after: Option<usize>,
        pub refuse: bool,
        pub prompts: Mutex<Vec<String>>,
    }

    impl ScriptedClient {
        pub(crate) fn answering(fragments: Vec<&'static str>) -> Self {
            Self {
                fragments,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl CompletionClient for ScriptedClient {
        async fn stream(&self, prompt: &str) -> Result<FragmentStream, GenerationError> {
            self.prompts.lock().unwrap().push(prompt.to_string());

            if self.refuse {
                return Err(GenerationError::Provider {
                    status: 400,
                    details: "maximum context length exceeded".to_string(),
                });
            }

            let mut items: Vec<Result<String, GenerationError>> = self
                .fragments
                .iter()
                .map(|fragment| Ok(fragment.to_string()))
                .collect();
            if let Some(at) = self.fail_after {
                items.truncate(at);
                items.push(Err(GenerationError::StreamInterrupted(
                    "connection reset".to_string(),
                )));
            }
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    fn context() -> ContextBlob {
        assemble_context(&DocumentSet::new(vec![PageRecord {
            source_path: PathBuf::from("policy.pdf"),
            page_number: 1,
            text: "Cabin bags up to 7 kg.".to_string(),
        }]))
    }

    fn answerer(client: Arc<ScriptedClient>) -> QuestionAnswerer {
        QuestionAnswerer::new(client, PromptTemplate::default())
    }

    #[tokio::test]
    async fn successful_turn_appends_question_then_answer() {
        let client = Arc::new(ScriptedClient::answering(vec!["Up to ", "7 kg", "."]));
        let answerer = answerer(client.clone());
        let mut conversation = Conversation::new();
        let mut seen = Vec::new();

        let answer = conversation
            .ask(&answerer, &context(), "Cabin bag limit?", |update| {
                seen.push((update.fragment.to_string(), update.answer_so_far.to_string()))
            })
            .await
            .expect("turn succeeds");

        assert_eq!(answer, "Up to 7 kg.");
        let messages = conversation.transcript().messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "Cabin bag limit?");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Up to 7 kg.");
        assert_eq!(conversation.state(), TurnState::Finalized);

        assert_eq!(
            seen,
            vec![
                ("Up to ".to_string(), "Up to ".to_string()),
                ("7 kg".to_string(), "Up to 7 kg".to_string()),
                (".".to_string(), "Up to 7 kg.".to_string()),
            ]
        );

        let prompts = client.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("Cabin bags up to 7 kg."));
        assert!(prompts[0].contains("Question: Cabin bag limit?"));
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_partial_and_dangling_question() {
        let client = Arc::new(ScriptedClient {
            fragments: vec!["Up to ", "7 kg", "."],
            fail_after: Some(2),
            ..ScriptedClient::default()
        });
        let answerer = answerer(client);
        let mut conversation = Conversation::new();
        let mut displayed = String::new();

        let error = conversation
            .ask(&answerer, &context(), "Cabin bag limit?", |update| {
                displayed.push_str(update.fragment)
            })
            .await
            .expect_err("stream fails");

        assert_eq!(error.partial, "Up to 7 kg");
        assert_eq!(displayed, error.partial);
        assert!(matches!(error.source, GenerationError::StreamInterrupted(_)));
        assert_eq!(conversation.transcript().len(), 1);
        assert_eq!(conversation.transcript().messages()[0].role, Role::User);
        assert_eq!(conversation.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn failure_before_first_fragment_returns_to_idle() {
        let client = Arc::new(ScriptedClient {
            refuse: true,
            ..ScriptedClient::default()
        });
        let answerer = answerer(client);
        let mut conversation = Conversation::new();

        let error = conversation
            .ask(&answerer, &context(), "anything", |_| {})
            .await
            .expect_err("provider refuses");

        assert!(error.partial.is_empty());
        assert!(matches!(error.source, GenerationError::Provider { status: 400, .. }));
        assert_eq!(conversation.transcript().len(), 1);
        assert_eq!(conversation.state(), TurnState::Idle);
    }

    #[tokio::test]
    async fn failed_turns_can_leave_consecutive_user_messages() {
        let failing = answerer(Arc::new(ScriptedClient {
            refuse: true,
            ..ScriptedClient::default()
        }));
        let working = answerer(Arc::new(ScriptedClient::answering(vec!["Yes."])));
        let mut conversation = Conversation::new();

        let _ = conversation.ask(&failing, &context(), "first", |_| {}).await;
        conversation
            .ask(&working, &context(), "second", |_| {})
            .await
            .expect("retry succeeds");

        let roles: Vec<Role> = conversation
            .transcript()
            .messages()
            .iter()
            .map(|message| message.role)
            .collect();
        assert_eq!(roles, vec![Role::User, Role::User, Role::Assistant]);
    }

    #[tokio::test]
    async fn empty_stream_finalizes_with_empty_answer() {
        let answerer = answerer(Arc::new(ScriptedClient::answering(Vec::new())));
        let mut conversation = Conversation::new();

        let answer = conversation
            .ask(&answerer, &context(), "q", |_| {})
            .await
            .expect("empty answer is still an answer");

        assert!(answer.is_empty());
        assert_eq!(conversation.transcript().len(), 2);
    }

    #[tokio::test]
    async fn reset_empties_transcript_regardless_of_length() {
        let answerer = answerer(Arc::new(ScriptedClient::answering(vec!["ok"])));
        let mut conversation = Conversation::new();

        conversation.reset();
        assert!(conversation.transcript().is_empty());
        assert_eq!(conversation.state(), TurnState::Idle);

        for question in ["one", "two", "three"] {
            conversation
                .ask(&answerer, &context(), question, |_| {})
                .await
                .expect("turn succeeds");
        }
        assert_eq!(conversation.transcript().len(), 6);

        conversation.reset();
        assert!(conversation.transcript().is_empty());
        assert_eq!(conversation.state(), TurnState::Idle);
    }
}

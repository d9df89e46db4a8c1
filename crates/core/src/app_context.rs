use crate::context::{assemble_context, ContextBlob};
use crate::conversation::{FragmentUpdate, QuestionAnswerer, TurnState};
use crate::error::{LoadError, SessionError};
use crate::ingest::{DocumentLoader, LoadReport};
use crate::models::{DocumentSet, Message};
use crate::prompt::PromptTemplate;
use crate::session::{SessionId, SessionRegistry};
use crate::traits::CompletionClient;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

/// Loaded documents and the context derived from them. Read-only once built.
pub struct KnowledgeBase {
    pub report: LoadReport,
    pub context: ContextBlob,
}

impl KnowledgeBase {
    pub fn from_report(report: LoadReport) -> Self {
        let context = assemble_context(&report.documents);
        Self { report, context }
    }

    pub fn documents(&self) -> &DocumentSet {
        &self.report.documents
    }

    pub fn is_empty(&self) -> bool {
        self.report.is_empty()
    }
}

/// Process-wide state, built once at startup and shared by reference.
pub struct AppContext {
    loader: DocumentLoader,
    answerer: QuestionAnswerer,
    knowledge: OnceCell<Arc<KnowledgeBase>>,
    sessions: SessionRegistry,
}

impl AppContext {
    pub fn new(
        loader: DocumentLoader,
        client: Arc<dyn CompletionClient>,
        template: PromptTemplate,
    ) -> Self {
        Self {
            loader,
            answerer: QuestionAnswerer::new(client, template),
            knowledge: OnceCell::new(),
            sessions: SessionRegistry::new(),
        }
    }

    /// Loads the documents on first call; concurrent first callers wait for
    /// the same load. Later calls reuse the result without touching disk. A
    /// failed load is not cached.
    pub async fn knowledge(&self) -> Result<Arc<KnowledgeBase>, LoadError> {
        self.knowledge
            .get_or_try_init(|| async {
                let report = self.loader.load().await?;
                let knowledge = KnowledgeBase::from_report(report);
                info!(
                    folder = %self.loader.options().folder.display(),
                    files = knowledge.report.sources.len(),
                    pages = knowledge.documents().len(),
                    skipped = knowledge.report.skipped_files.len(),
                    context_bytes = knowledge.context.len(),
                    "knowledge base ready"
                );
                Ok::<_, LoadError>(Arc::new(knowledge))
            })
            .await
            .map(Arc::clone)
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    pub async fn open_session(&self) -> SessionId {
        self.sessions.open().await
    }

    pub async fn close_session(&self, session: &SessionId) -> bool {
        self.sessions.close(session).await
    }

    pub async fn ask<F>(
        &self,
        session: &SessionId,
        question: &str,
        on_fragment: F,
    ) -> Result<String, SessionError>
    where
        F: FnMut(FragmentUpdate<'_>) + Send,
    {
        let knowledge = self.knowledge().await?;
        if knowledge.is_empty() {
            return Err(SessionError::NoDocuments);
        }

        let handle = self.handle(session).await?;
        let mut conversation = handle.lock().await;
        let answer = conversation
            .ask(&self.answerer, &knowledge.context, question, on_fragment)
            .await?;
        Ok(answer)
    }

    pub async fn reset(&self, session: &SessionId) -> Result<(), SessionError> {
        let handle = self.handle(session).await?;
        handle.lock().await.reset();
        Ok(())
    }

    pub async fn transcript(&self, session: &SessionId) -> Result<Vec<Message>, SessionError> {
        let handle = self.handle(session).await?;
        let conversation = handle.lock().await;
        Ok(conversation.transcript().messages().to_vec())
    }

    pub async fn turn_state(&self, session: &SessionId) -> Result<TurnState, SessionError> {
        let handle = self.handle(session).await?;
        let state = handle.lock().await.state();
        Ok(state)
    }

    async fn handle(
        &self,
        session: &SessionId,
    ) -> Result<crate::session::SessionHandle, SessionError> {
        self.sessions
            .get(session)
            .await
            .ok_or_else(|| SessionError::UnknownSession(session.to_string()))
    }
}

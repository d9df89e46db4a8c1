pub mod app_context;
pub mod context;
pub mod conversation;
pub mod credentials;
pub mod error;
pub mod extractor;
pub mod ingest;
pub mod models;
pub mod prompt;
pub mod providers;
pub mod session;
pub mod traits;

pub use app_context::{AppContext, KnowledgeBase};
pub use context::{assemble_context, ContextBlob, PAGE_SEPARATOR};
pub use conversation::{Conversation, FragmentUpdate, QuestionAnswerer, Transcript, TurnState};
pub use credentials::{
    resolve_api_key_from, ApiKey, CredentialSource, API_KEY_VAR, DEFAULT_SECRETS_FILE,
};
pub use error::{ConfigError, GenerationError, LoadError, SessionError, TurnError};
pub use extractor::{LopdfExtractor, PageExtractor, PdfExtractor};
pub use ingest::{digest_file, discover_pdf_files, DocumentLoader, LoadReport, SkippedPdf};
pub use models::{
    DocumentSet, GenerationSettings, LoadPolicy, LoaderOptions, Message, OcrEndpointConfig,
    PageRecord, Role, SourceDocument, DEFAULT_BASE_URL, DEFAULT_GLOB_PATTERN, DEFAULT_MAX_TOKENS,
    DEFAULT_MODEL, DEFAULT_TEMPERATURE,
};
pub use prompt::{PromptTemplate, DEFAULT_TEMPLATE, FALLBACK_ANSWER};
pub use providers::ChatCompletionsClient;
pub use session::{SessionHandle, SessionId, SessionRegistry};
pub use traits::{CompletionClient, FragmentStream};

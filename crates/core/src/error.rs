use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("pdf parse error: {0}")]
    PdfParse(String),

    #[error("failed to load {}: {reason}", .path.display())]
    File { path: PathBuf, reason: String },

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("multimodal OCR failed: {0}")]
    OcrFailed(String),

    #[error("extraction task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("authentication rejected by provider: {0}")]
    AuthenticationFailed(String),

    #[error("provider returned {status}: {details}")]
    Provider { status: u16, details: String },

    #[error("stream interrupted: {0}")]
    StreamInterrupted(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "XAI_API_KEY not found. Set it in the environment or in the secrets file {}",
        .secrets_file.display()
    )]
    MissingCredential { secrets_file: PathBuf },

    #[error("unable to read secrets file {}: {source}", .path.display())]
    SecretsFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed secrets file {}: {source}", .path.display())]
    SecretsFormat {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid prompt template: {0}")]
    Template(String),

    #[error("invalid provider url: {0}")]
    Url(#[from] url::ParseError),

    #[error("http client error: {0}")]
    HttpClient(#[from] reqwest::Error),
}

/// A turn that did not finish. `partial` holds the fragments that arrived
/// before the failure, in order.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct TurnError {
    pub partial: String,
    #[source]
    pub source: GenerationError,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("unknown session: {0}")]
    UnknownSession(String),

    #[error("documents unavailable: {0}")]
    Load(#[from] LoadError),

    #[error("no documents loaded; question answering is disabled")]
    NoDocuments,

    #[error(transparent)]
    Turn(#[from] TurnError),
}

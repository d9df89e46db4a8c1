use anyhow::Context;
use chrono::Utc;
use clap::Parser;
use pdf_qa_core::{
    resolve_api_key_from, AppContext, ChatCompletionsClient, DocumentLoader, GenerationSettings,
    KnowledgeBase, LoadPolicy, LoaderOptions, OcrEndpointConfig, PromptTemplate, SessionError,
    SessionId, API_KEY_VAR, DEFAULT_BASE_URL, DEFAULT_GLOB_PATTERN, DEFAULT_MAX_TOKENS,
    DEFAULT_MODEL, DEFAULT_SECRETS_FILE, DEFAULT_TEMPERATURE,
};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const CLEAR_COMMAND: &str = "/clear";

#[derive(Parser, Debug)]
#[command(name = "pdf-qa", version, about = "Ask questions about a folder of PDFs")]
struct Cli {
    /// Folder scanned for PDFs.
    #[arg(long, env = "PDF_QA_FOLDER", default_value = "pdfs")]
    folder: PathBuf,

    /// Glob matched against paths relative to the folder.
    #[arg(long, default_value = DEFAULT_GLOB_PATTERN)]
    glob: String,

    /// Skip PDFs that fail to parse instead of aborting the load.
    #[arg(long, default_value_t = false)]
    skip_unreadable: bool,

    /// OpenAI-compatible API base URL
    #[arg(long, env = "PDF_QA_BASE_URL", default_value = DEFAULT_BASE_URL)]
    base_url: String,

    /// Model identifier
    #[arg(long, default_value = DEFAULT_MODEL)]
    model: String,

    #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
    temperature: f32,

    /// Maximum answer length in tokens.
    #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
    max_tokens: u32,

    /// TOML file consulted for XAI_API_KEY when the environment has none.
    #[arg(long, default_value = DEFAULT_SECRETS_FILE)]
    secrets_file: PathBuf,

    /// Replace the built-in prompt; must contain {context} and {question}.
    #[arg(long)]
    prompt_template: Option<PathBuf>,

    /// Multimodal OCR endpoint used when a PDF has no extractable text.
    #[arg(long, env = "LLM_OCR_ENDPOINT")]
    ocr_endpoint: Option<String>,

    #[arg(long, env = "LLM_OCR_API_KEY", hide_env_values = true)]
    ocr_api_key: Option<String>,
}

impl Cli {
    fn loader_options(&self) -> LoaderOptions {
        let ocr = self
            .ocr_endpoint
            .as_ref()
            .map(|endpoint| endpoint.trim().to_string())
            .filter(|endpoint| !endpoint.is_empty())
            .map(|endpoint| OcrEndpointConfig {
                endpoint,
                api_key: self
                    .ocr_api_key
                    .as_ref()
                    .map(|key| key.trim().to_string())
                    .filter(|key| !key.is_empty()),
            });

        LoaderOptions {
            folder: self.folder.clone(),
            glob_pattern: self.glob.clone(),
            policy: if self.skip_unreadable {
                LoadPolicy::SkipUnreadable
            } else {
                LoadPolicy::Strict
            },
            ocr,
        }
    }

    fn generation_settings(&self) -> GenerationSettings {
        GenerationSettings {
            base_url: self.base_url.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "pdf-qa boot"
    );

    let Some((app, knowledge)) = start(&cli, std::env::var(API_KEY_VAR).ok()).await? else {
        println!("No PDF files were found in folder: '{}'", cli.folder.display());
        return Ok(());
    };

    for skipped in &knowledge.report.skipped_files {
        warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
        println!("Skipped {}: {}", skipped.path.display(), skipped.reason);
    }

    println!(
        "Loaded {} pages from {} PDFs",
        knowledge.documents().len(),
        knowledge.report.sources.len()
    );

    let session = app.open_session().await;
    info!(session = %session, "chat session started");
    let outcome = chat_loop(&app, &session).await;
    app.close_session(&session).await;
    outcome
}

/// Resolves the credential, builds the client and loads the documents, in
/// that order. Returns `None` when the folder holds no PDFs.
async fn start(
    cli: &Cli,
    env_key: Option<String>,
) -> anyhow::Result<Option<(AppContext, Arc<KnowledgeBase>)>> {
    // Nothing is loaded until a credential exists.
    let (api_key, source) = resolve_api_key_from(env_key, &cli.secrets_file)?;
    info!(source = ?source, "api key found");

    let template = match &cli.prompt_template {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("unable to read prompt template {}", path.display()))?;
            PromptTemplate::parse(&raw)?
        }
        None => PromptTemplate::default(),
    };

    let client = ChatCompletionsClient::new(cli.generation_settings(), api_key)?;
    info!(endpoint = %client.endpoint(), model = %client.settings().model, "llm client ready");

    let app = AppContext::new(
        DocumentLoader::new(cli.loader_options()),
        Arc::new(client),
        template,
    );

    println!("Loading and processing PDFs from '{}'...", cli.folder.display());
    let knowledge = app
        .knowledge()
        .await
        .context("error loading documents")?;

    if knowledge.is_empty() {
        return Ok(None);
    }
    Ok(Some((app, knowledge)))
}

async fn chat_loop(app: &AppContext, session: &SessionId) -> anyhow::Result<()> {
    println!(
        "Ask a question about the documents. {CLEAR_COMMAND} clears the chat history; Ctrl-D exits."
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("\n> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            println!();
            break;
        };

        let question = line.trim();
        if question.is_empty() {
            continue;
        }

        if question == CLEAR_COMMAND {
            app.reset(session).await?;
            println!("Chat history cleared.");
            continue;
        }

        answer(app, session, question).await?;
    }

    Ok(())
}

/// Streams one answer to stdout. Generation failures are reported and the
/// chat continues.
async fn answer(app: &AppContext, session: &SessionId, question: &str) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout();
    let result = app
        .ask(session, question, |update| {
            if let Err(error) = write_fragment(&mut stdout, update.fragment) {
                warn!(error = %error, "failed to write answer fragment");
            }
        })
        .await;
    println!();

    match result {
        Ok(_) => Ok(()),
        Err(SessionError::Turn(error)) => {
            eprintln!("Error during generation:\n{error}");
            Ok(())
        }
        Err(error) => Err(error.into()),
    }
}

fn write_fragment(out: &mut impl Write, fragment: &str) -> std::io::Result<()> {
    out.write_all(fragment.as_bytes())?;
    out.flush()
}

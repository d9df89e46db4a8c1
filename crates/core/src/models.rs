use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_GLOB_PATTERN: &str = "**/*.pdf";
pub const DEFAULT_BASE_URL: &str = "https://api.x.ai/v1";
pub const DEFAULT_MODEL: &str = "grok-4";
pub const DEFAULT_TEMPERATURE: f32 = 0.15;
pub const DEFAULT_MAX_TOKENS: u32 = 2_048;

/// Text of one page of one source PDF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub source_path: PathBuf,
    pub page_number: u32,
    pub text: String,
}

/// Every loaded page, files sorted by path and pages in document order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentSet {
    pages: Vec<PageRecord>,
}

impl DocumentSet {
    pub fn new(pages: Vec<PageRecord>) -> Self {
        Self { pages }
    }

    pub fn pages(&self) -> &[PageRecord] {
        &self.pages
    }

    pub fn len(&self) -> usize {
        self.pages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}

impl FromIterator<PageRecord> for DocumentSet {
    fn from_iter<I: IntoIterator<Item = PageRecord>>(iter: I) -> Self {
        Self {
            pages: iter.into_iter().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub path: PathBuf,
    pub checksum: String,
    pub page_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadPolicy {
    /// Any unreadable file aborts the whole load.
    #[default]
    Strict,
    /// Unreadable files are skipped and reported.
    SkipUnreadable,
}

#[derive(Debug, Clone)]
pub struct OcrEndpointConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct LoaderOptions {
    pub folder: PathBuf,
    pub glob_pattern: String,
    pub policy: LoadPolicy,
    pub ocr: Option<OcrEndpointConfig>,
}

impl LoaderOptions {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
            glob_pattern: DEFAULT_GLOB_PATTERN.to_string(),
            policy: LoadPolicy::default(),
            ocr: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationSettings {
    pub base_url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            created_at: Utc::now(),
        }
    }
}

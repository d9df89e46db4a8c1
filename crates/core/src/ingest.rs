use crate::extractor::{PageExtractor, PdfExtractor};
use crate::{DocumentSet, LoadError, LoadPolicy, LoaderOptions, PageRecord, SourceDocument};
use glob::{MatchOptions, Pattern};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Lists files under `folder` whose path relative to `folder` matches
/// `pattern`, sorted by path. A missing folder yields no files.
pub fn discover_pdf_files(folder: &Path, pattern: &str) -> Result<Vec<PathBuf>, LoadError> {
    let pattern = Pattern::new(pattern)?;
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry.path().strip_prefix(folder).unwrap_or(entry.path());
        if pattern.matches_path_with(relative, MATCH_OPTIONS) {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    Ok(files)
}

pub async fn digest_file(path: &Path) -> Result<String, LoadError> {
    let bytes = tokio::fs::read(path).await?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Default)]
pub struct LoadReport {
    pub documents: DocumentSet,
    pub sources: Vec<SourceDocument>,
    pub skipped_files: Vec<SkippedPdf>,
}

impl LoadReport {
    /// True when nothing was loaded and question answering must stay off.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

pub struct DocumentLoader {
    options: LoaderOptions,
    extractor: PageExtractor,
}

impl DocumentLoader {
    pub fn new(options: LoaderOptions) -> Self {
        let extractor = PageExtractor::new(Arc::new(crate::LopdfExtractor), options.ocr.clone());
        Self { options, extractor }
    }

    pub fn with_extractor(options: LoaderOptions, extractor: Arc<dyn PdfExtractor>) -> Self {
        let extractor = PageExtractor::new(extractor, options.ocr.clone());
        Self { options, extractor }
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.options
    }

    pub async fn load(&self) -> Result<LoadReport, LoadError> {
        let folder = &self.options.folder;
        let files = discover_pdf_files(folder, &self.options.glob_pattern)?;

        if files.is_empty() {
            warn!(
                folder = %folder.display(),
                pattern = %self.options.glob_pattern,
                "no pdf files were found"
            );
            return Ok(LoadReport::default());
        }

        info!(folder = %folder.display(), files = files.len(), "loading pdfs");

        let mut pages: Vec<PageRecord> = Vec::new();
        let mut sources = Vec::new();
        let mut skipped_files = Vec::new();

        for path in files {
            match self.load_file(&path).await {
                Ok((source, file_pages)) => {
                    info!(path = %path.display(), pages = source.page_count, "loaded pdf");
                    sources.push(source);
                    pages.extend(file_pages);
                }
                Err(error) => match self.options.policy {
                    LoadPolicy::Strict => {
                        return Err(LoadError::File {
                            path,
                            reason: error.to_string(),
                        })
                    }
                    LoadPolicy::SkipUnreadable => {
                        warn!(path = %path.display(), reason = %error, "skipped pdf");
                        skipped_files.push(SkippedPdf {
                            path,
                            reason: error.to_string(),
                        });
                    }
                },
            }
        }

        Ok(LoadReport {
            documents: DocumentSet::new(pages),
            sources,
            skipped_files,
        })
    }

    async fn load_file(&self, path: &Path) -> Result<(SourceDocument, Vec<PageRecord>), LoadError> {
        let checksum = digest_file(path).await?;
        let pages = self.extractor.extract(path).await?;

        Ok((
            SourceDocument {
                path: path.to_path_buf(),
                checksum,
                page_count: pages.len(),
            },
            pages,
        ))
    }
}

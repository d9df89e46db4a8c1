use crate::error::LoadError;
use crate::models::{OcrEndpointConfig, PageRecord};
use base64::{engine::general_purpose::STANDARD, Engine};
use lopdf::Document;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize)]
struct LlmOcrRequest {
    pdf_base64: String,
    source_path: String,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrResponse {
    pages: Option<Vec<LlmOcrPage>>,
    text: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct LlmOcrPage {
    #[serde(default)]
    page: Option<u32>,
    #[serde(default)]
    text: Option<String>,
}

/// Synchronous per-file text extraction. Implementations may block.
pub trait PdfExtractor: Send + Sync {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageRecord>, LoadError>;
}

#[derive(Debug, Default)]
pub struct LopdfExtractor;

impl PdfExtractor for LopdfExtractor {
    fn extract_pages(&self, path: &Path) -> Result<Vec<PageRecord>, LoadError> {
        let document = Document::load(path)
            .map_err(|error| LoadError::PdfParse(format!("{}: {error}", path.display())))?;

        let mut pages = Vec::new();
        for (page_no, _page_id) in document.get_pages() {
            let text = document
                .extract_text(&[page_no])
                .map_err(|error| LoadError::PdfParse(format!("{}: {error}", path.display())))?;

            pages.push(PageRecord {
                source_path: path.to_path_buf(),
                page_number: page_no,
                text,
            });
        }

        Ok(pages)
    }
}

/// Runs a [`PdfExtractor`] on the blocking pool and falls back to a
/// multimodal OCR endpoint when one is configured.
pub struct PageExtractor {
    extractor: Arc<dyn PdfExtractor>,
    ocr: Option<OcrClient>,
}

impl PageExtractor {
    pub fn new(extractor: Arc<dyn PdfExtractor>, ocr: Option<OcrEndpointConfig>) -> Self {
        Self {
            extractor,
            ocr: ocr.map(OcrClient::new),
        }
    }

    pub async fn extract(&self, path: &Path) -> Result<Vec<PageRecord>, LoadError> {
        let extractor = Arc::clone(&self.extractor);
        let owned = path.to_path_buf();
        let extracted = tokio::task::spawn_blocking(move || extractor.extract_pages(&owned)).await?;

        let Some(ocr) = &self.ocr else {
            if let Ok(pages) = &extracted {
                if !has_readable_text(pages) {
                    warn!(path = %path.display(), pages = pages.len(), "pdf has no readable text");
                }
            }
            return extracted;
        };

        match extracted {
            Ok(pages) if has_readable_text(&pages) => Ok(pages),
            Ok(pages) => match ocr.extract(path).await {
                Ok(recovered) => Ok(recovered),
                Err(error) => {
                    warn!(path = %path.display(), error = %error, "OCR fallback failed; keeping blank pages");
                    Ok(pages)
                }
            },
            Err(LoadError::PdfParse(parse_error)) => {
                ocr.extract(path).await.map_err(|ocr_error| {
                    LoadError::PdfParse(format!(
                        "{parse_error}; multimodal OCR fallback failed: {ocr_error}"
                    ))
                })
            }
            Err(error) => Err(error),
        }
    }
}

impl Default for PageExtractor {
    fn default() -> Self {
        Self::new(Arc::new(LopdfExtractor), None)
    }
}

fn has_readable_text(pages: &[PageRecord]) -> bool {
    pages.iter().any(|page| !page.text.trim().is_empty())
}

struct OcrClient {
    config: OcrEndpointConfig,
    client: Client,
}

impl OcrClient {
    fn new(config: OcrEndpointConfig) -> Self {
        Self {
            config,
            client: Client::new(),
        }
    }

    async fn extract(&self, path: &Path) -> Result<Vec<PageRecord>, LoadError> {
        debug!(path = %path.display(), endpoint = %self.config.endpoint, "requesting OCR");

        let pdf = tokio::fs::read(path).await?;
        let payload = LlmOcrRequest {
            pdf_base64: STANDARD.encode(pdf),
            source_path: path.to_string_lossy().to_string(),
        };

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header("content-type", "application/json")
            .json(&payload);

        if let Some(api_key) = &self.config.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await?;

        if !response.status().is_success() {
            return Err(LoadError::OcrFailed(format!(
                "multimodal OCR request to {} returned {}",
                self.config.endpoint,
                response.status()
            )));
        }

        let payload: LlmOcrResponse = response.json().await?;
        payload_to_pages(&payload, path)
    }
}

fn payload_to_pages(payload: &LlmOcrResponse, path: &Path) -> Result<Vec<PageRecord>, LoadError> {
    if let Some(listed) = &payload.pages {
        let listed = listed
            .iter()
            .enumerate()
            .filter_map(|(index, page)| {
                let text = page.text.as_ref().map(|value| value.trim().to_string());
                text.and_then(|normalized| {
                    if normalized.is_empty() {
                        None
                    } else {
                        Some(PageRecord {
                            source_path: path.to_path_buf(),
                            page_number: page.page.unwrap_or(index as u32 + 1),
                            text: normalized,
                        })
                    }
                })
            })
            .collect::<Vec<_>>();

        if !listed.is_empty() {
            return Ok(listed);
        }
    }

    if let Some(raw_text) = &payload.text {
        let pages = raw_text
            .split('\u{000c}')
            .enumerate()
            .filter_map(|(index, chunk)| {
                let normalized = chunk.trim().to_string();
                if normalized.is_empty() {
                    None
                } else {
                    Some(PageRecord {
                        source_path: path.to_path_buf(),
                        page_number: (index + 1) as u32,
                        text: normalized,
                    })
                }
            })
            .collect::<Vec<_>>();

        if !pages.is_empty() {
            return Ok(pages);
        }
    }

    Err(LoadError::OcrFailed(format!(
        "multimodal OCR response was empty for {}",
        path.display()
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{header, method, path as url_path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct BrokenExtractor;

    impl PdfExtractor for BrokenExtractor {
        fn extract_pages(&self, path: &Path) -> Result<Vec<PageRecord>, LoadError> {
            Err(LoadError::PdfParse(format!("{}: bad xref", path.display())))
        }
    }

    struct BlankExtractor {
        calls: AtomicUsize,
    }

    impl PdfExtractor for BlankExtractor {
        fn extract_pages(&self, path: &Path) -> Result<Vec<PageRecord>, LoadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![PageRecord {
                source_path: path.to_path_buf(),
                page_number: 1,
                text: " \n".to_string(),
            }])
        }
    }

    #[test]
    fn ocr_payload_with_pages_converts_only_nonempty_text() {
        let response = LlmOcrResponse {
            pages: Some(vec![
                LlmOcrPage {
                    page: Some(2),
                    text: Some("  ".to_string()),
                },
                LlmOcrPage {
                    page: Some(3),
                    text: Some("Baggage allowance".to_string()),
                },
            ]),
            text: None,
        };

        let pages = payload_to_pages(&response, Path::new("x.pdf"))
            .expect("multimodal response should be parsed");

        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].page_number, 3);
        assert_eq!(pages[0].text, "Baggage allowance");
        assert_eq!(pages[0].source_path, PathBuf::from("x.pdf"));
    }

    #[test]
    fn unnumbered_ocr_pages_are_numbered_in_order() {
        let response = LlmOcrResponse {
            pages: Some(
                ["one", "two", "three"]
                    .into_iter()
                    .map(|text| LlmOcrPage {
                        page: None,
                        text: Some(text.to_string()),
                    })
                    .collect(),
            ),
            text: None,
        };

        let pages = payload_to_pages(&response, Path::new("scan.pdf"))
            .expect("multimodal response should be parsed");

        let numbers: Vec<u32> = pages.iter().map(|page| page.page_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(pages[2].text, "three");
    }

    #[test]
    fn ocr_payload_fallback_text_split_by_form_feed() {
        let response = LlmOcrResponse {
            pages: None,
            text: Some("First\u{000C}Second\n".to_string()),
        };

        let pages = payload_to_pages(&response, Path::new("x.pdf"))
            .expect("multimodal response should be parsed");

        assert_eq!(pages.len(), 2);
        assert_eq!(pages[0].page_number, 1);
        assert_eq!(pages[0].text, "First");
        assert_eq!(pages[1].page_number, 2);
        assert_eq!(pages[1].text, "Second");
    }

    #[test]
    fn empty_ocr_payload_is_an_error() {
        let response = LlmOcrResponse {
            pages: Some(Vec::new()),
            text: Some("  \u{000C} ".to_string()),
        };

        assert!(matches!(
            payload_to_pages(&response, Path::new("x.pdf")),
            Err(LoadError::OcrFailed(_))
        ));
    }

    #[tokio::test]
    async fn parse_failure_without_ocr_is_reported() {
        let extractor = PageExtractor::new(Arc::new(BrokenExtractor), None);
        let result = extractor.extract(Path::new("broken.pdf")).await;

        match result {
            Err(LoadError::PdfParse(message)) => assert!(message.contains("broken.pdf")),
            other => panic!("expected parse error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn blank_pages_are_kept_without_ocr() {
        let blank = Arc::new(BlankExtractor {
            calls: AtomicUsize::new(0),
        });
        let extractor = PageExtractor::new(blank.clone(), None);

        let pages = extractor
            .extract(Path::new("scan.pdf"))
            .await
            .expect("blank pages are not an error");

        assert_eq!(pages.len(), 1);
        assert_eq!(blank.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn parse_failure_falls_back_to_ocr_endpoint() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(url_path("/ocr"))
            .and(header("authorization", "Bearer ocr-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "pages": [{ "page": 1, "text": "Recovered policy text" }]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let dir = tempfile::tempdir()?;
        let file = dir.path().join("scan.pdf");
        std::fs::write(&file, b"%PDF-1.4\n%broken")?;

        let extractor = PageExtractor::new(
            Arc::new(BrokenExtractor),
            Some(OcrEndpointConfig {
                endpoint: format!("{}/ocr", server.uri()),
                api_key: Some("ocr-key".to_string()),
            }),
        );

        let pages = extractor.extract(&file).await?;
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].text, "Recovered policy text");
        assert_eq!(pages[0].source_path, file);
        Ok(())
    }

    #[tokio::test]
    async fn ocr_failure_after_parse_failure_mentions_both() -> Result<(), Box<dyn std::error::Error>> {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir()?;
        let file = dir.path().join("scan.pdf");
        std::fs::write(&file, b"%PDF-1.4\n%broken")?;

        let extractor = PageExtractor::new(
            Arc::new(BrokenExtractor),
            Some(OcrEndpointConfig {
                endpoint: server.uri(),
                api_key: None,
            }),
        );

        match extractor.extract(&file).await {
            Err(LoadError::PdfParse(message)) => {
                assert!(message.contains("bad xref"));
                assert!(message.contains("OCR fallback failed"));
            }
            other => panic!("expected combined parse error, got {other:?}"),
        }
        Ok(())
    }
}

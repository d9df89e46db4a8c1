use crate::DocumentSet;

pub const PAGE_SEPARATOR: &str = "\n\n";

/// All page texts of a [`DocumentSet`], joined in load order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextBlob(String);

impl ContextBlob {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Display for ContextBlob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// No truncation happens here; a context larger than the model's input
/// budget is rejected by the provider.
pub fn assemble_context(documents: &DocumentSet) -> ContextBlob {
    ContextBlob(
        documents
            .pages()
            .iter()
            .map(|page| page.text.as_str())
            .collect::<Vec<_>>()
            .join(PAGE_SEPARATOR),
    )
}

//! Model types
//!
//! Catalog entries describing the downloadable GGUF models.

use once_cell::sync::Lazy;
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::download::DownloadError;
use crate::storage::huggingface::{normalize_source_url, sanitize_local_filename};

/// File extension shared by every catalog entry.
pub const MODEL_EXTENSION: &str = "gguf";

/// Immutable description of a downloadable model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    /// Unique catalog key
    pub id: String,
    /// Display name of the model
    pub name: String,
    /// Short description shown next to the name
    pub description: String,
    /// Canonical file stem; the file on disk is `<filename>.gguf`
    pub filename: String,
    /// Where the weights are fetched from
    pub source_url: String,
    /// Human-readable size, e.g. "4.37 GB"
    pub size_label: String,
    /// Prompt template / variant tag used by the inference layer
    pub template: String,
}

impl ModelDescriptor {
    /// Parse and normalise the source URL.
    pub fn source_url(&self) -> Result<Url, DownloadError> {
        normalize_source_url(&self.source_url)
    }

    /// Name of the canonical file inside the models directory.
    pub fn file_name(&self) -> Result<String, DownloadError> {
        let stem = sanitize_local_filename(&self.filename)?;
        if stem != self.filename {
            return Err(DownloadError::InvalidModel(format!(
                "{}: filename {:?} is not a plain file name",
                self.id, self.filename
            )));
        }
        Ok(format!("{}.{}", stem, MODEL_EXTENSION))
    }
}

/// Static list of models the application knows how to fetch
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelCatalog {
    models: Vec<ModelDescriptor>,
}

static BUILTIN: Lazy<ModelCatalog> = Lazy::new(|| {
    ModelCatalog::new(vec![
        ModelDescriptor {
            id: "llama-3.2-3b-instruct".to_string(),
            name: "Llama 3.2 3B Instruct".to_string(),
            description: "Small general-purpose chat model, fast on recent phones".to_string(),
            filename: "Llama-3.2-3B-Instruct-Q4_K_M".to_string(),
            source_url: "https://huggingface.co/bartowski/Llama-3.2-3B-Instruct-GGUF/resolve/main/Llama-3.2-3B-Instruct-Q4_K_M.gguf".to_string(),
            size_label: "2.02 GB".to_string(),
            template: "llama3".to_string(),
        },
        ModelDescriptor {
            id: "phi-3.5-mini-instruct".to_string(),
            name: "Phi 3.5 Mini Instruct".to_string(),
            description: "Compact reasoning model with a long context window".to_string(),
            filename: "Phi-3.5-mini-instruct-Q4_K_M".to_string(),
            source_url: "https://huggingface.co/bartowski/Phi-3.5-mini-instruct-GGUF/resolve/main/Phi-3.5-mini-instruct-Q4_K_M.gguf".to_string(),
            size_label: "2.39 GB".to_string(),
            template: "phi3".to_string(),
        },
        ModelDescriptor {
            id: "mistral-7b-instruct".to_string(),
            name: "Mistral 7B Instruct v0.3".to_string(),
            description: "Larger model with better answers, needs a high-memory device".to_string(),
            filename: "Mistral-7B-Instruct-v0.3-Q4_K_M".to_string(),
            source_url: "https://huggingface.co/bartowski/Mistral-7B-Instruct-v0.3-GGUF/resolve/main/Mistral-7B-Instruct-v0.3-Q4_K_M.gguf".to_string(),
            size_label: "4.37 GB".to_string(),
            template: "mistral".to_string(),
        },
    ])
});

impl ModelCatalog {
    pub fn new(models: Vec<ModelDescriptor>) -> Self {
        Self { models }
    }

    /// The catalog compiled into the application.
    pub fn builtin() -> &'static ModelCatalog {
        &BUILTIN
    }

    pub fn get(&self, id: &str) -> Option<&ModelDescriptor> {
        self.models.iter().find(|model| model.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ModelDescriptor> {
        self.models.iter()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

//! Extension → rasterizer mapping.
//!
//! Built explicitly by the caller and handed to whoever picks a rasterizer
//! for a document; nothing registers itself.

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::rasterize::{ImageRasterizer, PdfiumRasterizer, Rasterizer};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Builds a rasterizer from the pipeline configuration.
pub type RasterizerFactory = Arc<dyn Fn(&PipelineConfig) -> Arc<dyn Rasterizer> + Send + Sync>;

#[derive(Clone, Default)]
pub struct RasterizerRegistry {
    factories: HashMap<String, RasterizerFactory>,
}

impl std::fmt::Debug for RasterizerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RasterizerRegistry")
            .field("extensions", &self.extensions())
            .finish()
    }
}

impl RasterizerRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// `pdf` via pdfium; `png`, `jpg`, `jpeg` as single-page documents.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("pdf", |config| -> Arc<dyn Rasterizer> {
            Arc::new(PdfiumRasterizer::from_config(config))
        });
        for ext in ["png", "jpg", "jpeg"] {
            registry.register(ext, |config| -> Arc<dyn Rasterizer> {
                Arc::new(ImageRasterizer::from_config(config))
            });
        }
        registry
    }

    /// Map `extension` (case-insensitive, without the dot) to `factory`,
    /// replacing any previous mapping.
    pub fn register<F>(&mut self, extension: &str, factory: F) -> &mut Self
    where
        F: Fn(&PipelineConfig) -> Arc<dyn Rasterizer> + Send + Sync + 'static,
    {
        self.factories.insert(normalize(extension), Arc::new(factory));
        self
    }

    pub fn supports(&self, extension: &str) -> bool {
        self.factories.contains_key(&normalize(extension))
    }

    /// Registered extensions, sorted.
    pub fn extensions(&self) -> Vec<String> {
        let mut exts: Vec<String> = self.factories.keys().cloned().collect();
        exts.sort();
        exts
    }

    /// Build the rasterizer for `path`'s extension.
    pub fn for_path(
        &self,
        path: &Path,
        config: &PipelineConfig,
    ) -> Result<Arc<dyn Rasterizer>, PipelineError> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_string())
            .unwrap_or_default();
        self.factories
            .get(&normalize(&extension))
            .map(|factory| factory(config))
            .ok_or_else(|| PipelineError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension,
            })
    }
}

fn normalize(extension: &str) -> String {
    extension.trim_start_matches('.').to_ascii_lowercase()
}

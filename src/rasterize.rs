//! Page rasterizers: document + optional page range → ordered page images.
//!
//! The pipeline only depends on the [`Rasterizer`] trait. Two adapters ship
//! with the crate:
//!
//! * [`PdfiumRasterizer`] — PDF pages via `pdfium-render`. pdfium keeps
//!   thread-local state and is not async-safe, so all work happens inside
//!   `tokio::task::spawn_blocking`.
//! * [`ImageRasterizer`] — a PNG/JPEG file treated as a one-page document.

use crate::config::{PageRange, PipelineConfig};
use crate::error::RasterizeError;
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// One rendered page, as returned by a rasterizer.
#[derive(Debug, Clone)]
pub struct PageImage {
    /// 1-based page number in the source document.
    pub page_number: usize,
    pub image: DynamicImage,
}

/// Converts a document into ordered page images.
#[async_trait]
pub trait Rasterizer: Send + Sync {
    /// Render `range` (all pages when `None`) in ascending page order.
    async fn rasterize(
        &self,
        document: &Path,
        range: Option<PageRange>,
    ) -> Result<Vec<PageImage>, RasterizeError>;
}

// ── PDF ──────────────────────────────────────────────────────────────────

/// Renders PDF pages with pdfium.
///
/// The shared library is located through `PDFIUM_LIB_PATH` (a file or a
/// directory) and falls back to the system library search path.
#[derive(Debug, Clone)]
pub struct PdfiumRasterizer {
    dpi: u32,
    max_pixels: u32,
    password: Option<String>,
}

impl PdfiumRasterizer {
    pub fn new(dpi: u32, max_pixels: u32, password: Option<String>) -> Self {
        Self {
            dpi,
            max_pixels,
            password,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.dpi, config.max_rendered_pixels, config.password.clone())
    }
}

#[async_trait]
impl Rasterizer for PdfiumRasterizer {
    async fn rasterize(
        &self,
        document: &Path,
        range: Option<PageRange>,
    ) -> Result<Vec<PageImage>, RasterizeError> {
        let path = document.to_path_buf();
        let this = self.clone();

        tokio::task::spawn_blocking(move || this.rasterize_blocking(&path, range))
            .await
            .map_err(|e| RasterizeError::Task(e.to_string()))?
    }
}

impl PdfiumRasterizer {
    fn rasterize_blocking(
        &self,
        pdf_path: &Path,
        range: Option<PageRange>,
    ) -> Result<Vec<PageImage>, RasterizeError> {
        let pdfium = Pdfium::new(bind_pdfium()?);

        let document = pdfium
            .load_pdf_from_file(pdf_path, self.password.as_deref())
            .map_err(|e| {
                let detail = format!("{:?}", e);
                if detail.to_lowercase().contains("password") {
                    RasterizeError::PasswordRequired {
                        path: pdf_path.to_path_buf(),
                    }
                } else {
                    RasterizeError::Corrupt {
                        path: pdf_path.to_path_buf(),
                        detail,
                    }
                }
            })?;

        let pages = document.pages();
        let total_pages = pages.len() as usize;
        info!("PDF loaded: {} pages", total_pages);

        let indices: Vec<usize> = match range {
            Some(r) => {
                if r.start > total_pages {
                    return Err(RasterizeError::PageOutOfRange {
                        page: r.start,
                        total: total_pages,
                    });
                }
                r.to_indices(total_pages)
            }
            None => (0..total_pages).collect(),
        };

        let scale = self.dpi as f32 / 72.0;
        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(scale)
            .set_maximum_width(self.max_pixels as i32)
            .set_maximum_height(self.max_pixels as i32);

        let mut results = Vec::with_capacity(indices.len());
        for idx in indices {
            let page = pages
                .get(idx as u16)
                .map_err(|e| RasterizeError::PageFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                })?;

            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| RasterizeError::PageFailed {
                    page: idx + 1,
                    detail: format!("{:?}", e),
                })?;

            let image = bitmap.as_image();
            debug!(
                "Rendered page {} → {}x{} px",
                idx + 1,
                image.width(),
                image.height()
            );
            results.push(PageImage {
                page_number: idx + 1,
                image,
            });
        }

        Ok(results)
    }
}

/// Bind to pdfium: `PDFIUM_LIB_PATH` first, then the system library.
fn bind_pdfium() -> Result<Box<dyn PdfiumLibraryBindings>, RasterizeError> {
    if let Ok(configured) = std::env::var("PDFIUM_LIB_PATH") {
        if !configured.is_empty() {
            let configured = PathBuf::from(configured);
            let lib = if configured.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&configured)
            } else {
                configured
            };
            return Pdfium::bind_to_library(&lib)
                .map_err(|e| RasterizeError::Binding(format!("{}: {:?}", lib.display(), e)));
        }
    }
    Pdfium::bind_to_system_library().map_err(|e| RasterizeError::Binding(format!("{:?}", e)))
}

// ── Single images ────────────────────────────────────────────────────────

/// Treats a PNG or JPEG file as a one-page document.
#[derive(Debug, Clone, Default)]
pub struct ImageRasterizer {
    max_pixels: Option<u32>,
}

impl ImageRasterizer {
    pub fn new(max_pixels: Option<u32>) -> Self {
        Self { max_pixels }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(Some(config.max_rendered_pixels))
    }
}

#[async_trait]
impl Rasterizer for ImageRasterizer {
    async fn rasterize(
        &self,
        document: &Path,
        range: Option<PageRange>,
    ) -> Result<Vec<PageImage>, RasterizeError> {
        if let Some(r) = range {
            if r.start > 1 {
                return Err(RasterizeError::PageOutOfRange {
                    page: r.start,
                    total: 1,
                });
            }
        }

        let path = document.to_path_buf();
        let max_pixels = self.max_pixels;
        let image = tokio::task::spawn_blocking(move || {
            image::open(&path).map_err(|e| RasterizeError::Read {
                path: path.clone(),
                detail: e.to_string(),
            })
        })
        .await
        .map_err(|e| RasterizeError::Task(e.to_string()))??;

        let image = match max_pixels {
            Some(max) if image.width() > max || image.height() > max => {
                image.resize(max, max, image::imageops::FilterType::Triangle)
            }
            _ => image,
        };

        Ok(vec![PageImage {
            page_number: 1,
            image,
        }])
    }
}

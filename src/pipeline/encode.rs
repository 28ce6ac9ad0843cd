//! Image encoding: `DynamicImage` → base64 PNG wrapped in `ImageData`.
//!
//! PNG is lossless, which keeps rendered text crisp for the vision model.
//! `detail: "high"` asks tile-based models for the full image budget; without
//! it fine print and small tables are lost.

use crate::error::ExtractionError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a page image as a base64 PNG ready for the vision API.
pub fn encode_image(img: &DynamicImage) -> Result<ImageData, ExtractionError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)
        .map_err(|e| ExtractionError::Encode(e.to_string()))?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64", b64.len());

    Ok(ImageData::new(b64, "image/png").with_detail("high"))
}

/// Encode several images off the async executor, preserving order.
///
/// PNG compression of a full page is CPU-bound; each image is encoded on the
/// blocking pool and the results are joined.
pub async fn encode_images(images: &[&DynamicImage]) -> Result<Vec<ImageData>, ExtractionError> {
    let handles = images.iter().map(|img| {
        let img = (*img).clone();
        tokio::task::spawn_blocking(move || encode_image(&img))
    });

    futures::future::join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap_or_else(|e| Err(ExtractionError::Encode(e.to_string()))))
        .collect()
}

use crate::types::RawDetection;
use async_trait::async_trait;
use failure::format_err;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageOutputFormat};
use imageproc::contrast::{otsu_level, threshold};
use log::debug;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;

/// Characters the engine is allowed to emit.
pub const ALLOWLIST: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789 ";

const UPSCALE: u32 = 3;

/// Grayscale, upscale and binarize a photo ahead of OCR.
pub fn preprocess(image: &DynamicImage) -> GrayImage {
    let gray = imageops::grayscale(image);
    let resized = imageops::resize(
        &gray,
        gray.width() * UPSCALE,
        gray.height() * UPSCALE,
        FilterType::CatmullRom,
    );
    let level = otsu_level(&resized);
    debug!(
        "Preprocessed {}x{} image, otsu level {}",
        resized.width(),
        resized.height(),
        level
    );
    threshold(&resized, level)
}

/// Text recognition backend. Built once at start-up and shared between
/// requests, so implementations must tolerate concurrent calls.
#[async_trait]
pub trait OcrEngine: Send + Sync {
    /// Detections in whatever order the engine produces them; may be empty.
    async fn read_text(&self, image: &GrayImage) -> Result<Vec<RawDetection>, failure::Error>;
}

/// OCR served over HTTP: the image goes up as PNG, detections come back as
/// `[{"box": [[x, y], ...], "text": "...", "confidence": 0.9}]`.
pub struct RemoteOcr {
    client: reqwest::Client,
    url: String,
}

#[derive(Debug, Deserialize)]
struct RemoteDetection {
    #[serde(rename = "box")]
    corners: Vec<[f64; 2]>,
    text: String,
    confidence: f64,
}

impl RemoteDetection {
    fn into_raw(self) -> Result<RawDetection, failure::Error> {
        let left = self
            .corners
            .first()
            .map(|corner| corner[0])
            .ok_or_else(|| format_err!("Detection {:?} has no bounding box", self.text))?;
        Ok(RawDetection {
            left,
            text: self.text,
            confidence: self.confidence,
        })
    }
}

impl RemoteOcr {
    pub fn new(url: &str) -> RemoteOcr {
        RemoteOcr {
            client: reqwest::Client::new(),
            url: url.to_string(),
        }
    }
}

#[async_trait]
impl OcrEngine for RemoteOcr {
    async fn read_text(&self, image: &GrayImage) -> Result<Vec<RawDetection>, failure::Error> {
        let mut png: Vec<u8> = vec![];
        DynamicImage::ImageLuma8(image.clone()).write_to(&mut png, ImageOutputFormat::Png)?;
        let detections: Vec<RemoteDetection> = self
            .client
            .post(&self.url)
            .query(&[("allowlist", ALLOWLIST)])
            .header(CONTENT_TYPE, "image/png")
            .body(png)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        debug!("OCR backend returned {} detections", detections.len());
        detections.into_iter().map(RemoteDetection::into_raw).collect()
    }
}

use std::io::Cursor;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use image::{ImageFormat, Rgba};
use retouch_contracts::codec::CanonicalImage;
use sha2::{Digest, Sha256};

use crate::{canonical_from_bytes, TransformEngine, TransformRequest, TransformResponse};

/// Offline engine: tints the source with a colour derived from the
/// instruction. Same input, same output.
pub struct DryrunEngine {
    delay: Duration,
}

impl DryrunEngine {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl TransformEngine for DryrunEngine {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn transform(&self, request: &TransformRequest) -> Result<TransformResponse> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        Ok(TransformResponse {
            image: tint_image(&request.image, &request.instruction)?,
            warnings: Vec::new(),
        })
    }
}

fn tint_image(source: &CanonicalImage, instruction: &str) -> Result<CanonicalImage> {
    let bytes = source.bytes()?;
    let mut image = image::load_from_memory(&bytes)
        .context("dryrun failed to decode source image")?
        .to_rgba8();
    let (r, g, b) = color_from_instruction(instruction);
    for pixel in image.pixels_mut() {
        let Rgba([pr, pg, pb, alpha]) = *pixel;
        *pixel = Rgba([blend(pr, r), blend(pg, g), blend(pb, b), alpha]);
    }

    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .context("dryrun failed to encode result")?;
    canonical_from_bytes("dryrun", out.into_inner(), Some("image/png"))
}

fn blend(base: u8, tint: u8) -> u8 {
    ((base as u16 + tint as u16) / 2) as u8
}

fn color_from_instruction(instruction: &str) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(instruction.trim().as_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

//! Preparation stage: composite the selected mask into the alpha channel.

use crate::engine::PreparedInput;
use crate::intake::InputImage;
use crate::mask::Mask;

use super::error::JobError;

/// Build the engine's RGBA input: colour from `image`, alpha 255 where `mask`
/// is set and 0 elsewhere.
pub fn compose_rgba(image: &InputImage, mask: &Mask, seed: u64) -> Result<PreparedInput, JobError> {
    image.validate()?;
    let (w, h) = (image.width() as usize, image.height() as usize);
    if mask.width() != w || mask.height() != h {
        return Err(JobError::InvalidInput(format!(
            "mask is {}x{} but image is {}x{}",
            mask.width(),
            mask.height(),
            w,
            h
        )));
    }

    let mut rgba = Vec::with_capacity(w * h * 4);
    for (i, px) in image.rgb().chunks_exact(3).enumerate() {
        let alpha = if mask.get(i % w, i / w) { 255 } else { 0 };
        rgba.extend_from_slice(&[px[0], px[1], px[2], alpha]);
    }

    Ok(PreparedInput {
        width: image.width(),
        height: image.height(),
        rgba,
        seed,
    })
}

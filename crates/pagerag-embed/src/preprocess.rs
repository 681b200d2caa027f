use anyhow::{ensure, Result};
use candle_core::{DType, Device, Tensor};
use image::imageops::FilterType;
use image::DynamicImage;

/// Side length the ColPali vision tower expects.
pub const IMAGE_SIZE: u32 = 448;

/// RGB `[3, size, size]` in `[-1, 1]`.
pub fn image_to_tensor(image: &DynamicImage, size: u32, device: &Device) -> Result<Tensor> {
    let rgb = image.resize_exact(size, size, FilterType::Triangle).to_rgb8();
    let side = size as usize;
    let tensor = Tensor::from_vec(rgb.into_raw(), (side, side, 3), device)?
        .permute((2, 0, 1))?
        .to_dtype(DType::F32)?
        .affine(2.0 / 255.0, -1.0)?;
    Ok(tensor)
}

pub fn images_to_tensor(images: &[DynamicImage], size: u32, device: &Device) -> Result<Tensor> {
    ensure!(!images.is_empty(), "no images to embed");
    let tensors = images
        .iter()
        .map(|img| image_to_tensor(img, size, device))
        .collect::<Result<Vec<_>>>()?;
    Ok(Tensor::stack(&tensors, 0)?)
}

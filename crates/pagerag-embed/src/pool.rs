use anyhow::{ensure, Result};
use candle_core::{DType, Device, Tensor};

use pagerag_core::types::MultiVector;

/// `[B, T, D]` token embeddings to one multivector per batch row.
pub fn all_rows(embeddings: &Tensor) -> Result<Vec<MultiVector>> {
    ensure!(embeddings.dims().len() == 3, "embeddings shape must be [B,T,D], got {:?}", embeddings.dims());
    Ok(embeddings.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.to_vec3()?)
}

/// Like [`all_rows`] but keeps only positions whose attention mask is set.
pub fn masked_rows(embeddings: &Tensor, masks: &[Vec<u32>]) -> Result<Vec<MultiVector>> {
    let rows = all_rows(embeddings)?;
    ensure!(rows.len() == masks.len(), "mask count {} != batch size {}", masks.len(), rows.len());
    Ok(rows
        .into_iter()
        .zip(masks)
        .map(|(tokens, mask)| {
            tokens
                .into_iter()
                .zip(mask.iter())
                .filter(|(_, keep)| **keep != 0)
                .map(|(token, _)| token)
                .collect()
        })
        .collect())
}

use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::{PaddingParams, PaddingStrategy, Tokenizer};

/// Encode `texts` padded to the longest one.
///
/// Returns `[B, T]` ids plus the per-row attention masks so callers can drop
/// padding positions from token-level outputs.
pub fn tokenize_batch(tokenizer: &Tokenizer, texts: &[String], device: &Device) -> Result<(Tensor, Vec<Vec<u32>>)> {
    let mut tokenizer = tokenizer.clone();
    tokenizer.with_padding(Some(PaddingParams { strategy: PaddingStrategy::BatchLongest, ..Default::default() }));
    let encodings = tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(|e| anyhow!("Tokenization failed: {}", e))?;

    let rows = encodings
        .iter()
        .map(|enc| Tensor::new(enc.get_ids(), device))
        .collect::<candle_core::Result<Vec<_>>>()?;
    let input_ids = Tensor::stack(&rows, 0)?;
    let masks = encodings.iter().map(|enc| enc.get_attention_mask().to_vec()).collect();
    Ok((input_ids, masks))
}

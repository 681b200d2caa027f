use anyhow::{anyhow, Result};
use std::collections::HashMap;
use std::hash::Hasher;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::{colpali, paligemma};
use image::imageops::FilterType;
use image::DynamicImage;
use tokenizers::Tokenizer;
use tracing::{debug, info};
use twox_hash::XxHash64;

use pagerag_core::config::EmbedSettings;
use pagerag_core::traits::Embedder;
use pagerag_core::types::MultiVector;

pub mod device;
pub mod pool;
pub mod preprocess;
pub mod tokenize;

pub use pool::{all_rows, masked_rows};

/// Sub-vector length of the ColPali projection head.
pub const COLPALI_DIM: usize = 128;
const IMAGE_PROMPT: &str = "Describe the image.";
const QUERY_PREFIX: &str = "Query: ";

/// ColPali (PaliGemma 3B, 448px) multi-vector embedder on candle.
pub struct ColPaliEmbedder {
    model: Mutex<colpali::Model>,
    tokenizer: Tokenizer,
    device: Device,
    dtype: DType,
}

impl ColPaliEmbedder {
    pub fn new(settings: &EmbedSettings) -> Result<Self> {
        let device = device::select_device(&settings.device)?;
        let dtype = device::select_dtype(&settings.dtype, &device);
        let model_dir = resolve_model_dir(settings.model_dir.as_deref())?;
        info!(model_dir = %model_dir.display(), ?dtype, "loading ColPali model");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", tokenizer_path.display(), e))?;

        let mut tensors: HashMap<String, Tensor> = HashMap::new();
        for file in safetensors_in(&model_dir)? {
            debug!(file = %file.display(), "reading weights");
            tensors.extend(candle_core::safetensors::load(&file, &device)?);
        }
        let vb = VarBuilder::from_tensors(tensors, dtype, &device);
        let config = paligemma::Config::paligemma_3b_448();
        let model = colpali::Model::new(&config, vb)?;
        info!("ColPali model loaded");
        Ok(Self { model: Mutex::new(model), tokenizer, device, dtype })
    }

    fn lock_model(&self) -> Result<std::sync::MutexGuard<'_, colpali::Model>> {
        self.model.lock().map_err(|_| anyhow!("ColPali model lock poisoned"))
    }
}

impl Embedder for ColPaliEmbedder {
    fn dim(&self) -> usize { COLPALI_DIM }

    fn embed_images(&self, images: &[DynamicImage]) -> Result<Vec<MultiVector>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        let start = Instant::now();
        let pixel_values = preprocess::images_to_tensor(images, preprocess::IMAGE_SIZE, &self.device)?
            .to_dtype(self.dtype)?;
        let prompts = vec![IMAGE_PROMPT.to_string(); images.len()];
        let (input_ids, _) = tokenize::tokenize_batch(&self.tokenizer, &prompts, &self.device)?;
        let embeddings = self.lock_model()?.forward_images(&pixel_values, &input_ids)?;
        let out = all_rows(&embeddings)?;
        debug!(images = images.len(), elapsed_ms = start.elapsed().as_millis() as u64, "embedded images");
        Ok(out)
    }

    fn embed_queries(&self, queries: &[String]) -> Result<Vec<MultiVector>> {
        if queries.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = queries.iter().map(|q| format!("{QUERY_PREFIX}{q}")).collect();
        let (input_ids, masks) = tokenize::tokenize_batch(&self.tokenizer, &texts, &self.device)?;
        let embeddings = self.lock_model()?.forward_text(&input_ids)?;
        masked_rows(&embeddings, &masks)
    }
}

/// Deterministic stand-in for the real model: hashed, L2-normalized sub-vectors.
///
/// Queries get one sub-vector per lowercase whitespace token; images get one
/// per cell of a 4x4 grid over a downscaled copy.
pub struct FakeEmbedder { dim: usize }

impl FakeEmbedder {
    const GRID: u32 = 4;

    pub fn new(dim: usize) -> Self { Self { dim } }

    fn seeded_vector(&self, seed: u64) -> Vec<f32> {
        let mut state = seed;
        let mut v: Vec<f32> = (0..self.dim)
            .map(|_| {
                state = splitmix64(state);
                ((state >> 40) as f32 / (1u64 << 24) as f32) * 2.0 - 1.0
            })
            .collect();
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
        for x in &mut v { *x /= norm; }
        v
    }
}

impl Embedder for FakeEmbedder {
    fn dim(&self) -> usize { self.dim }

    fn embed_images(&self, images: &[DynamicImage]) -> Result<Vec<MultiVector>> {
        Ok(images
            .iter()
            .map(|img| {
                let cells = img.resize_exact(Self::GRID, Self::GRID, FilterType::Triangle).to_rgb8();
                cells
                    .pixels()
                    .enumerate()
                    .map(|(i, px)| {
                        let mut hasher = XxHash64::with_seed(i as u64);
                        hasher.write(&px.0);
                        self.seeded_vector(hasher.finish())
                    })
                    .collect()
            })
            .collect())
    }

    fn embed_queries(&self, queries: &[String]) -> Result<Vec<MultiVector>> {
        Ok(queries
            .iter()
            .map(|q| {
                let tokens: Vec<String> = q.split_whitespace().map(str::to_lowercase).collect();
                let tokens = if tokens.is_empty() { vec![String::new()] } else { tokens };
                tokens
                    .iter()
                    .map(|t| {
                        let mut hasher = XxHash64::with_seed(0);
                        hasher.write(t.as_bytes());
                        self.seeded_vector(hasher.finish())
                    })
                    .collect()
            })
            .collect())
    }
}

fn splitmix64(x: u64) -> u64 {
    let mut z = x.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

pub fn get_default_embedder(settings: &EmbedSettings) -> Result<Box<dyn Embedder>> {
    if settings.fake || pagerag_core::config::env_flag("APP_USE_FAKE_EMBEDDINGS") {
        info!(dim = COLPALI_DIM, "using FakeEmbedder");
        return Ok(Box::new(FakeEmbedder::new(COLPALI_DIM)));
    }
    Ok(Box::new(ColPaliEmbedder::new(settings)?))
}

/// `APP_MODEL_DIR`, `MODEL_DIR`, the configured dir, then `../models/colpali` and `models/colpali`.
pub fn resolve_model_dir(configured: Option<&str>) -> Result<PathBuf> {
    let candidates = [
        std::env::var("APP_MODEL_DIR").ok(),
        std::env::var("MODEL_DIR").ok(),
        configured.map(str::to_string),
        Some("../models/colpali".to_string()),
        Some("models/colpali".to_string()),
    ];
    candidates
        .into_iter()
        .flatten()
        .map(pagerag_core::config::expand_path)
        .find(|p| p.exists())
        .ok_or_else(|| anyhow!("Could not locate ColPali model directory"))
}

fn safetensors_in(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "safetensors"))
        .collect();
    files.sort();
    if files.is_empty() {
        return Err(anyhow!("No .safetensors weights in {}", dir.display()));
    }
    Ok(files)
}

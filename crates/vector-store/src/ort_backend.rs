use crate::embeddings::{normalize, EmbeddingBackend};
use crate::error::{Result, VectorStoreError};
use ndarray::{Array2, ArrayD, ArrayView2, ArrayView3, Axis, Dimension, Ix2, Ix3, IxDyn};
use ort::session::{builder::GraphOptimizationLevel, Input, Session, SessionInputs};
use ort::tensor::TensorElementType;
use ort::value::{DynTensor, Tensor, ValueType};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::Mutex;
use tokenizers::{Encoding, PaddingParams, PaddingStrategy, Tokenizer, TruncationParams};

const DEFAULT_MAX_LENGTH: usize = 256;
const DEFAULT_MAX_BATCH: usize = 32;
const MANIFEST_FILE: &str = "manifest.json";

/// Files and shape of one sentence-transformer export
#[derive(Clone, Debug)]
pub(crate) struct ModelLayout {
    pub(crate) id: String,
    pub(crate) model_path: PathBuf,
    pub(crate) tokenizer_path: PathBuf,
    pub(crate) dimension: Option<usize>,
    pub(crate) max_length: usize,
    pub(crate) max_batch: usize,
}

/// Optional `<model_dir>/<id>/manifest.json`; paths are relative to the model folder
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ModelManifest {
    model: Option<String>,
    tokenizer: Option<String>,
    dimension: Option<usize>,
    max_length: Option<usize>,
    max_batch: Option<usize>,
}

impl ModelLayout {
    /// Locate `model_id` under `model_dir`.
    ///
    /// Without a manifest the usual export names apply: `model.onnx`, `tokenizer.json`, and the
    /// width from `config.json`. A manifest overrides any of them.
    pub(crate) fn resolve(model_id: &str, model_dir: &Path) -> Result<Self> {
        let root = model_dir.join(model_id);
        let manifest = read_manifest(&root.join(MANIFEST_FILE))?;

        let asset = |declared: Option<&str>, fallback: &str| -> Result<PathBuf> {
            match declared {
                Some(rel) => Ok(root.join(checked_relative(model_id, rel)?)),
                None => Ok(root.join(fallback)),
            }
        };

        Ok(Self {
            id: model_id.to_string(),
            model_path: asset(manifest.model.as_deref(), "model.onnx")?,
            tokenizer_path: asset(manifest.tokenizer.as_deref(), "tokenizer.json")?,
            dimension: manifest
                .dimension
                .or_else(|| read_hidden_size(&root.join("config.json"))),
            max_length: manifest.max_length.unwrap_or(DEFAULT_MAX_LENGTH).max(1),
            max_batch: manifest.max_batch.unwrap_or(DEFAULT_MAX_BATCH).max(1),
        })
    }
}

fn read_manifest(path: &Path) -> Result<ModelManifest> {
    if !path.exists() {
        return Ok(ModelManifest::default());
    }
    let raw = std::fs::read_to_string(path).map_err(|e| {
        VectorStoreError::EmbedderUnavailable(format!("Cannot read {}: {e}", path.display()))
    })?;
    serde_json::from_str(&raw).map_err(|e| {
        VectorStoreError::EmbedderUnavailable(format!("Malformed {}: {e}", path.display()))
    })
}

/// Manifest paths must stay inside the model folder
fn checked_relative(model_id: &str, rel: &str) -> Result<PathBuf> {
    let path = Path::new(rel);
    let escapes = path
        .components()
        .any(|c| matches!(c, Component::Prefix(_) | Component::RootDir | Component::ParentDir));
    let named = path.components().any(|c| matches!(c, Component::Normal(_)));
    if escapes || !named {
        return Err(VectorStoreError::EmbedderUnavailable(format!(
            "Manifest of '{model_id}' names '{rel}', which is not a path inside the model folder"
        )));
    }
    Ok(path.to_path_buf())
}

fn read_hidden_size(config_path: &Path) -> Option<usize> {
    let raw = std::fs::read_to_string(config_path).ok()?;
    let value: serde_json::Value = serde_json::from_str(&raw).ok()?;
    ["hidden_size", "dim", "d_model"]
        .iter()
        .find_map(|key| value.get(*key)?.as_u64())
        .and_then(|dim| usize::try_from(dim).ok())
}

/// Token ids, attention mask and segment ids of one padded batch, each `batch × seq_len`
struct EncodedBatch {
    ids: Array2<i64>,
    mask: Array2<i64>,
    type_ids: Array2<i64>,
}

impl EncodedBatch {
    fn from_encodings(encodings: &[Encoding]) -> Self {
        let seq_len = encodings.iter().map(Encoding::len).max().unwrap_or(0);
        let shape = (encodings.len(), seq_len);
        let pick = |field: fn(&Encoding) -> &[u32]| {
            Array2::from_shape_fn(shape, |(row, col)| {
                field(&encodings[row]).get(col).map_or(0, |v| i64::from(*v))
            })
        };
        Self {
            ids: pick(Encoding::get_ids),
            mask: pick(Encoding::get_attention_mask),
            type_ids: pick(Encoding::get_type_ids),
        }
    }
}

/// Sentence-transformer inference on ONNX Runtime (CPU)
pub(crate) struct OrtBackend {
    id: String,
    session: Mutex<Session>,
    tokenizer: Tokenizer,
    max_batch: usize,
    dimension: Option<usize>,
}

fn unavailable<E: std::fmt::Display>(what: &'static str) -> impl Fn(E) -> VectorStoreError {
    move |e| VectorStoreError::EmbedderUnavailable(format!("{what}: {e}"))
}

fn inference<E: std::fmt::Display>(what: &'static str) -> impl Fn(E) -> VectorStoreError {
    move |e| VectorStoreError::EmbeddingError(format!("{what}: {e}"))
}

impl OrtBackend {
    pub(crate) fn new(layout: &ModelLayout) -> Result<Self> {
        let assets = [
            ("ONNX model", &layout.model_path),
            ("tokenizer", &layout.tokenizer_path),
        ];
        for (kind, path) in assets {
            if !path.exists() {
                return Err(VectorStoreError::EmbedderUnavailable(format!(
                    "{kind} for '{}' not found at {}",
                    layout.id,
                    path.display()
                )));
            }
        }

        // Already running on the blocking pool.
        if !tokenizers::utils::parallelism::is_parallelism_configured() {
            tokenizers::utils::parallelism::set_parallelism(false);
        }
        let mut tokenizer = Tokenizer::from_file(&layout.tokenizer_path).map_err(|e| {
            VectorStoreError::EmbedderUnavailable(format!("Tokenizer load failed: {e}"))
        })?;
        tokenizer.with_padding(Some(PaddingParams {
            strategy: PaddingStrategy::BatchLongest,
            ..PaddingParams::default()
        }));
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: layout.max_length,
                ..TruncationParams::default()
            }))
            .map_err(|e| {
                VectorStoreError::EmbedderUnavailable(format!("Tokenizer truncation: {e}"))
            })?;

        let session = Session::builder()
            .map_err(unavailable("ONNX session"))?
            .with_intra_threads(intra_threads())
            .map_err(unavailable("ONNX intra threads"))?
            .with_inter_threads(1)
            .map_err(unavailable("ONNX inter threads"))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(unavailable("ONNX optimization level"))?
            .commit_from_file(&layout.model_path)
            .map_err(unavailable("ONNX model load"))?;

        log::info!(
            "ONNX model '{}' loaded from {} (max_length {}, batch {})",
            layout.id,
            layout.model_path.display(),
            layout.max_length,
            layout.max_batch
        );

        Ok(Self {
            id: layout.id.clone(),
            session: Mutex::new(session),
            tokenizer,
            max_batch: layout.max_batch,
            dimension: layout.dimension,
        })
    }

    fn forward(&self, batch: EncodedBatch) -> Result<ArrayD<f32>> {
        let shape = batch.ids.raw_dim().into_dyn();
        let mut named: HashMap<String, DynTensor> = HashMap::new();
        for (name, array) in [
            ("input_ids", batch.ids),
            ("attention_mask", batch.mask),
            ("token_type_ids", batch.type_ids),
        ] {
            let tensor = Tensor::from_array(array.into_dyn())
                .map_err(inference("input tensor"))?
                .upcast();
            named.insert(name.to_string(), tensor);
        }

        let mut session = self
            .session
            .lock()
            .map_err(|_| VectorStoreError::EmbeddingError("ONNX session lock poisoned".into()))?;

        // Exports differ in which of the three inputs they declare; extra ones get zeros.
        let mut feed: HashMap<String, DynTensor> = HashMap::new();
        for input in &session.inputs {
            let tensor = match named.remove(&input.name) {
                Some(tensor) => tensor,
                None => zeros_for(input, &shape)?,
            };
            feed.insert(input.name.clone(), tensor);
        }

        let outputs = session
            .run(SessionInputs::from(feed))
            .map_err(inference("ONNX forward"))?;
        if outputs.len() == 0 {
            return Err(VectorStoreError::EmbeddingError(
                "ONNX model produced no outputs".to_string(),
            ));
        }
        let hidden = outputs[0]
            .try_extract_array::<f32>()
            .map_err(inference("ONNX output"))?
            .to_owned();
        Ok(hidden)
    }
}

impl EmbeddingBackend for OrtBackend {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn native_dimension(&self) -> Option<usize> {
        self.dimension
    }

    fn embed_batch_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for group in texts.chunks(self.max_batch) {
            let encodings = self
                .tokenizer
                .encode_batch(group.to_vec(), true)
                .map_err(|e| {
                    VectorStoreError::EmbeddingError(format!("Tokenization failed: {e}"))
                })?;
            if encodings.is_empty() {
                continue;
            }
            let batch = EncodedBatch::from_encodings(&encodings);
            let mask = batch.mask.mapv(|m| m as f32);
            let output = self.forward(batch)?;
            vectors.extend(sentence_vectors(output, mask.view())?);
        }
        Ok(vectors)
    }
}

fn intra_threads() -> usize {
    let cpus = std::thread::available_parallelism().map_or(1, |n| n.get());
    // Leave most cores to the HTTP workers and the ingestion loop.
    (cpus / 4).clamp(1, 4)
}

/// Turn a model output into unit-length sentence vectors.
///
/// Rank-2 outputs are already pooled; rank-3 outputs are token states that get mean-pooled over
/// the attention mask.
fn sentence_vectors(output: ArrayD<f32>, mask: ArrayView2<'_, f32>) -> Result<Vec<Vec<f32>>> {
    let shape_error = |e: ndarray::ShapeError| {
        VectorStoreError::EmbeddingError(format!("ONNX output shape: {e}"))
    };
    let pooled = match output.ndim() {
        2 => output.into_dimensionality::<Ix2>().map_err(shape_error)?,
        3 => {
            let hidden = output.into_dimensionality::<Ix3>().map_err(shape_error)?;
            if hidden.dim().0 != mask.nrows() || hidden.dim().1 != mask.ncols() {
                return Err(VectorStoreError::EmbeddingError(format!(
                    "ONNX output {:?} does not match the {:?} attention mask",
                    hidden.shape(),
                    mask.shape()
                )));
            }
            mean_pool(hidden.view(), mask)
        }
        _ => {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Unexpected ONNX output shape {:?}",
                output.shape()
            )))
        }
    };

    Ok(pooled
        .outer_iter()
        .map(|row| {
            let mut vector = row.to_vec();
            normalize(&mut vector);
            vector
        })
        .collect())
}

/// Masked mean over the token axis; rows with an all-zero mask pool to zeros
fn mean_pool(hidden: ArrayView3<'_, f32>, mask: ArrayView2<'_, f32>) -> Array2<f32> {
    let weights = mask.insert_axis(Axis(2));
    let summed = (&hidden * &weights).sum_axis(Axis(1));
    let counts = mask
        .sum_axis(Axis(1))
        .mapv(|count| count.max(1.0))
        .insert_axis(Axis(1));
    summed / &counts
}

fn zeros_for(input: &Input, shape: &IxDyn) -> Result<DynTensor> {
    let ValueType::Tensor { ty, .. } = &input.input_type else {
        return Err(VectorStoreError::EmbeddingError(format!(
            "ONNX input '{}' is not a tensor",
            input.name
        )));
    };
    let tensor = match ty {
        TensorElementType::Int64 => Tensor::from_array(ArrayD::<i64>::zeros(shape.clone()))
            .map_err(inference("zero input"))?
            .upcast(),
        TensorElementType::Float32 => Tensor::from_array(ArrayD::<f32>::zeros(shape.clone()))
            .map_err(inference("zero input"))?
            .upcast(),
        TensorElementType::Bool => Tensor::from_array(ArrayD::from_elem(shape.clone(), false))
            .map_err(inference("zero input"))?
            .upcast(),
        other => {
            return Err(VectorStoreError::EmbeddingError(format!(
                "Cannot fill ONNX input '{}' of type {other:?}",
                input.name
            )))
        }
    };
    Ok(tensor)
}

use crate::error::{Result, VectorStoreError};
use crate::ort_backend::{ModelLayout, OrtBackend};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tokio::task::spawn_blocking;

/// Model used when none is configured
pub const DEFAULT_MODEL_ID: &str = "all-MiniLM-L6-v2";

/// Dimension assumed when the model cannot report one
pub const DEFAULT_DIMENSION: usize = 384;

const DIMENSION_SAMPLE_TEXT: &str = "dimension sample";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbeddingMode {
    #[default]
    Onnx,
    Stub,
}

impl EmbeddingMode {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Onnx => "onnx",
            Self::Stub => "stub",
        }
    }
}

impl FromStr for EmbeddingMode {
    type Err = VectorStoreError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "onnx" | "fast" => Ok(Self::Onnx),
            "stub" => Ok(Self::Stub),
            other => Err(VectorStoreError::InvalidConfig(format!(
                "Unsupported embedding mode '{other}' (expected 'onnx' or 'stub')"
            ))),
        }
    }
}

impl fmt::Display for EmbeddingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    pub mode: EmbeddingMode,
    pub model_id: String,
    pub model_dir: PathBuf,
    /// Used as `D` when neither the model files nor a sample embedding can tell the dimension
    pub default_dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            mode: EmbeddingMode::Onnx,
            model_id: DEFAULT_MODEL_ID.to_string(),
            model_dir: PathBuf::from("models"),
            default_dimension: DEFAULT_DIMENSION,
        }
    }
}

impl EmbeddingConfig {
    #[must_use]
    pub fn stub() -> Self {
        Self {
            mode: EmbeddingMode::Stub,
            ..Self::default()
        }
    }
}

/// A text to vector function
///
/// Implementations are synchronous and may be slow; [`EmbeddingModel`] moves every call onto the
/// blocking pool.
pub trait EmbeddingBackend: Send + Sync {
    fn model_id(&self) -> &str;

    /// Output dimension if the backend knows it without running inference
    fn native_dimension(&self) -> Option<usize>;

    fn embed_batch_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Deterministic hash-seeded unit vectors
#[derive(Debug, Clone)]
pub struct StubBackend {
    id: String,
    dimension: usize,
}

impl StubBackend {
    #[must_use]
    pub fn new(id: impl Into<String>, dimension: usize) -> Self {
        Self {
            id: id.into(),
            dimension,
        }
    }
}

impl EmbeddingBackend for StubBackend {
    fn model_id(&self) -> &str {
        &self.id
    }

    fn native_dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    fn embed_batch_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| stub_embed(&self.id, text, self.dimension))
            .collect())
    }
}

/// Embedder shared by ingestion and queries
///
/// `D` is resolved once when the model is built and never changes afterwards.
#[derive(Clone)]
pub struct EmbeddingModel {
    backend: Arc<dyn EmbeddingBackend>,
    dimension: usize,
}

impl EmbeddingModel {
    /// Build the embedder described by `config`.
    ///
    /// Fails with [`VectorStoreError::EmbedderUnavailable`] when the ONNX backend cannot be loaded.
    /// Blocking: call it from startup code or `spawn_blocking`.
    pub fn load(config: &EmbeddingConfig) -> Result<Self> {
        if config.default_dimension == 0 {
            return Err(VectorStoreError::InvalidConfig(
                "default embedding dimension must be positive".to_string(),
            ));
        }
        let backend: Arc<dyn EmbeddingBackend> = match config.mode {
            EmbeddingMode::Stub => {
                Arc::new(StubBackend::new(&config.model_id, config.default_dimension))
            }
            EmbeddingMode::Onnx => {
                let layout = ModelLayout::resolve(&config.model_id, &config.model_dir)?;
                Arc::new(OrtBackend::new(&layout)?)
            }
        };
        Ok(Self::from_backend(backend, config.default_dimension))
    }

    /// Wrap an existing backend, resolving `D`: the backend's own answer, then a sample embedding,
    /// then `default_dimension`.
    pub fn from_backend(backend: Arc<dyn EmbeddingBackend>, default_dimension: usize) -> Self {
        let dimension = match backend.native_dimension().filter(|d| *d > 0) {
            Some(dimension) => dimension,
            None => match measure_dimension(backend.as_ref()) {
                Ok(dimension) => dimension,
                Err(e) => {
                    log::warn!(
                        "Could not determine embedding dimension of '{}' ({e}); using default {default_dimension}",
                        backend.model_id()
                    );
                    default_dimension
                }
            },
        };
        log::info!(
            "Embedding model '{}' ready (dimension {dimension})",
            backend.model_id()
        );
        Self { backend, dimension }
    }

    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    #[must_use]
    pub fn model_id(&self) -> &str {
        self.backend.model_id()
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut embeddings = self.embed_batch(vec![text]).await?;
        embeddings
            .pop()
            .ok_or_else(|| VectorStoreError::EmbeddingError("Empty embedding result".to_string()))
    }

    /// Embed many texts at once. Output order matches input order.
    ///
    /// Blank texts map to the zero vector of length `D` and never reach the backend.
    pub async fn embed_batch(&self, texts: Vec<&str>) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut out: Vec<Vec<f32>> = vec![Vec::new(); texts.len()];
        let mut pending_idx = Vec::new();
        let mut pending = Vec::new();
        for (idx, text) in texts.iter().enumerate() {
            if text.trim().is_empty() {
                out[idx] = vec![0.0; self.dimension];
            } else {
                pending_idx.push(idx);
                pending.push((*text).to_string());
            }
        }

        if !pending.is_empty() {
            let backend = self.backend.clone();
            let vectors = spawn_blocking(move || backend.embed_batch_blocking(&pending))
                .await
                .map_err(|e| VectorStoreError::EmbeddingError(format!("Join error: {e}")))??;
            if vectors.len() != pending_idx.len() {
                return Err(VectorStoreError::EmbeddingError(format!(
                    "Backend returned {} vectors for {} texts",
                    vectors.len(),
                    pending_idx.len()
                )));
            }
            for (idx, vector) in pending_idx.into_iter().zip(vectors) {
                if vector.len() != self.dimension {
                    return Err(VectorStoreError::DimensionMismatch {
                        expected: self.dimension,
                        actual: vector.len(),
                    });
                }
                out[idx] = vector;
            }
        }

        Ok(out)
    }
}

impl fmt::Debug for EmbeddingModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EmbeddingModel")
            .field("model_id", &self.model_id())
            .field("dimension", &self.dimension)
            .finish()
    }
}

fn measure_dimension(backend: &dyn EmbeddingBackend) -> Result<usize> {
    let vectors = backend.embed_batch_blocking(&[DIMENSION_SAMPLE_TEXT.to_string()])?;
    match vectors.first().map(Vec::len) {
        Some(dimension) if dimension > 0 => Ok(dimension),
        _ => Err(VectorStoreError::EmbeddingError(
            "sample embedding returned no vector".to_string(),
        )),
    }
}

pub(crate) fn normalize(vec: &mut [f32]) {
    let norm = vec.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vec {
        *value /= norm;
    }
}

fn stub_embed(model_id: &str, text: &str, dimension: usize) -> Vec<f32> {
    let mut state = fnv1a_64(model_id.as_bytes())
        ^ fnv1a_64(text.as_bytes()).rotate_left(17)
        ^ (dimension as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut vec = Vec::with_capacity(dimension);
    for _ in 0..dimension {
        let bits = splitmix64(&mut state);
        let mantissa = ((bits >> 32) as u32) >> 9;
        let unit = f32::from_bits(0x3f80_0000 | mantissa) - 1.0;
        vec.push(unit.mul_add(2.0, -1.0));
    }
    normalize(&mut vec);
    vec
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

const fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that does not know its dimension and counts calls
    struct OpaqueBackend {
        dimension: usize,
        calls: AtomicUsize,
    }

    impl EmbeddingBackend for OpaqueBackend {
        fn model_id(&self) -> &str {
            "opaque"
        }

        fn native_dimension(&self) -> Option<usize> {
            None
        }

        fn embed_batch_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.dimension == 0 {
                return Err(VectorStoreError::EmbeddingError("offline".to_string()));
            }
            Ok(texts.iter().map(|_| vec![1.0; self.dimension]).collect())
        }
    }

    #[test]
    fn mode_parses_known_values() {
        assert_eq!("ONNX".parse::<EmbeddingMode>().unwrap(), EmbeddingMode::Onnx);
        assert_eq!(" stub ".parse::<EmbeddingMode>().unwrap(), EmbeddingMode::Stub);
        assert!("gpu".parse::<EmbeddingMode>().is_err());
    }

    #[test]
    fn stub_is_deterministic_and_unit_length() {
        let a = stub_embed("m", "hello", 16);
        let b = stub_embed("m", "hello", 16);
        let c = stub_embed("m", "goodbye", 16);
        assert_eq!(a, b);
        assert_ne!(a, c);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn stub_vectors_depend_on_model_id() {
        assert_ne!(stub_embed("m1", "same", 8), stub_embed("m2", "same", 8));
    }

    #[test]
    fn dimension_is_measured_when_backend_is_silent() {
        let backend = Arc::new(OpaqueBackend {
            dimension: 12,
            calls: AtomicUsize::new(0),
        });
        let model = EmbeddingModel::from_backend(backend.clone(), DEFAULT_DIMENSION);
        assert_eq!(model.dimension(), 12);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dimension_falls_back_to_default() {
        let backend = Arc::new(OpaqueBackend {
            dimension: 0,
            calls: AtomicUsize::new(0),
        });
        let model = EmbeddingModel::from_backend(backend, DEFAULT_DIMENSION);
        assert_eq!(model.dimension(), DEFAULT_DIMENSION);
    }

    #[test]
    fn load_stub_uses_default_dimension() {
        let model = EmbeddingModel::load(&EmbeddingConfig::stub()).unwrap();
        assert_eq!(model.dimension(), DEFAULT_DIMENSION);
        assert_eq!(model.model_id(), DEFAULT_MODEL_ID);
    }

    #[test]
    fn load_onnx_without_files_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let config = EmbeddingConfig {
            model_dir: dir.path().to_path_buf(),
            ..EmbeddingConfig::default()
        };
        let err = EmbeddingModel::load(&config).err().expect("no model on disk");
        assert!(matches!(err, VectorStoreError::EmbedderUnavailable(_)));
    }

    #[tokio::test]
    async fn blank_text_embeds_to_zero_vector() {
        let backend = Arc::new(OpaqueBackend {
            dimension: 4,
            calls: AtomicUsize::new(0),
        });
        let model = EmbeddingModel::from_backend(backend.clone(), DEFAULT_DIMENSION);
        let calls_after_measuring = backend.calls.load(Ordering::SeqCst);

        let vectors = model.embed_batch(vec!["", "text", "  "]).await.unwrap();
        assert_eq!(vectors[0], vec![0.0; 4]);
        assert_eq!(vectors[1], vec![1.0; 4]);
        assert_eq!(vectors[2], vec![0.0; 4]);
        assert_eq!(backend.calls.load(Ordering::SeqCst), calls_after_measuring + 1);

        let only_blank = model.embed("").await.unwrap();
        assert_eq!(only_blank, vec![0.0; 4]);
        assert_eq!(backend.calls.load(Ordering::SeqCst), calls_after_measuring + 1);
    }

    #[tokio::test]
    async fn wrong_backend_dimension_is_rejected() {
        struct Liar;
        impl EmbeddingBackend for Liar {
            fn model_id(&self) -> &str {
                "liar"
            }
            fn native_dimension(&self) -> Option<usize> {
                Some(8)
            }
            fn embed_batch_blocking(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
                Ok(texts.iter().map(|_| vec![0.5; 3]).collect())
            }
        }

        let model = EmbeddingModel::from_backend(Arc::new(Liar), DEFAULT_DIMENSION);
        let err = model.embed("anything").await.unwrap_err();
        assert!(matches!(
            err,
            VectorStoreError::DimensionMismatch {
                expected: 8,
                actual: 3
            }
        ));
    }
}

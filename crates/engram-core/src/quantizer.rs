//! Learned vector quantizer.
//!
//! Maps a fixed-dimension feature vector to the integer code of its nearest
//! prototype (squared Euclidean distance, lowest code wins ties) and keeps the
//! codebook representative with an online EMA update of the chosen prototype.
//!
//! Usage counters are atomics so `quantize` can run behind a shared
//! reference; `quantize_and_update` mutates EMA state and needs `&mut self`.

use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::constants::{
    DEFAULT_CODEBOOK_SIZE, DEFAULT_COMMITMENT_WEIGHT, DEFAULT_DIM, DEFAULT_EMA_DECAY,
    QUANTIZER_EPSILON,
};
use crate::error::{CoreError, Result};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuantizerConfig {
    /// Number of prototypes (K).
    pub codes: usize,
    /// Prototype dimension (D).
    pub dim: usize,
    pub commitment_weight: f32,
    pub ema_decay: f32,
    pub epsilon: f32,
}

impl Default for QuantizerConfig {
    fn default() -> Self {
        Self {
            codes: DEFAULT_CODEBOOK_SIZE,
            dim: DEFAULT_DIM,
            commitment_weight: DEFAULT_COMMITMENT_WEIGHT,
            ema_decay: DEFAULT_EMA_DECAY,
            epsilon: QUANTIZER_EPSILON,
        }
    }
}

impl QuantizerConfig {
    pub fn new(codes: usize, dim: usize) -> Self {
        Self {
            codes,
            dim,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.codes == 0 || self.codes > u32::MAX as usize {
            return Err(CoreError::InvalidConfig(format!(
                "codebook size must be in 1..=u32::MAX, got {}",
                self.codes
            )));
        }
        if self.dim == 0 {
            return Err(CoreError::InvalidConfig("dimension must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.ema_decay) {
            return Err(CoreError::InvalidConfig(format!(
                "ema_decay must be in [0, 1), got {}",
                self.ema_decay
            )));
        }
        if !(self.commitment_weight.is_finite() && self.commitment_weight >= 0.0) {
            return Err(CoreError::InvalidConfig(format!(
                "commitment_weight must be finite and non-negative, got {}",
                self.commitment_weight
            )));
        }
        if !(self.epsilon.is_finite() && self.epsilon > 0.0) {
            return Err(CoreError::InvalidConfig(format!(
                "epsilon must be finite and positive, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }
}

/// Serializable codebook state. Restoring it reproduces quantization exactly.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodebookSnapshot {
    pub size: usize,
    pub dim: usize,
    pub commitment_weight: f32,
    pub ema_decay: f32,
    pub epsilon: f32,
    pub prototypes: Vec<Vec<f32>>,
    pub ema_mass: Vec<f32>,
    pub ema_sum: Vec<Vec<f32>>,
    pub usage: Vec<u64>,
    pub total_encodings: u64,
}

impl CodebookSnapshot {
    fn config(&self) -> QuantizerConfig {
        QuantizerConfig {
            codes: self.size,
            dim: self.dim,
            commitment_weight: self.commitment_weight,
            ema_decay: self.ema_decay,
            epsilon: self.epsilon,
        }
    }

    /// Check every length against `size` and `dim`.
    pub fn validate(&self) -> Result<()> {
        self.config()
            .validate()
            .map_err(|e| CoreError::SnapshotMismatch(e.to_string()))?;

        let rows = |name: &str, len: usize| -> Result<()> {
            if len != self.size {
                return Err(CoreError::SnapshotMismatch(format!(
                    "{name}: expected {} entries, got {len}",
                    self.size
                )));
            }
            Ok(())
        };
        rows("prototypes", self.prototypes.len())?;
        rows("emaMass", self.ema_mass.len())?;
        rows("emaSum", self.ema_sum.len())?;
        rows("usage", self.usage.len())?;

        for (code, (proto, sum)) in self.prototypes.iter().zip(&self.ema_sum).enumerate() {
            if proto.len() != self.dim || sum.len() != self.dim {
                return Err(CoreError::SnapshotMismatch(format!(
                    "code {code}: expected dimension {}, got prototype {} / emaSum {}",
                    self.dim,
                    proto.len(),
                    sum.len()
                )));
            }
            if proto.iter().chain(sum).any(|x| !x.is_finite()) {
                return Err(CoreError::SnapshotMismatch(format!(
                    "code {code}: non-finite component"
                )));
            }
        }
        Ok(())
    }
}

pub struct VectorQuantizer {
    config: QuantizerConfig,
    /// Row-major K×D.
    prototypes: Vec<f32>,
    ema_mass: Vec<f32>,
    /// Row-major K×D.
    ema_sum: Vec<f32>,
    usage: Vec<AtomicU64>,
    total_encodings: AtomicU64,
}

impl Clone for VectorQuantizer {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            prototypes: self.prototypes.clone(),
            ema_mass: self.ema_mass.clone(),
            ema_sum: self.ema_sum.clone(),
            usage: self
                .usage
                .iter()
                .map(|u| AtomicU64::new(u.load(Ordering::Relaxed)))
                .collect(),
            total_encodings: AtomicU64::new(self.total_encodings.load(Ordering::Relaxed)),
        }
    }
}

impl std::fmt::Debug for VectorQuantizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VectorQuantizer")
            .field("codes", &self.config.codes)
            .field("dim", &self.config.dim)
            .field("total_encodings", &self.total_encodings())
            .finish()
    }
}

impl VectorQuantizer {
    /// Build from explicit prototypes. EMA state starts at mass 1 with the
    /// prototype as its running sum, so the first update moves it gradually.
    pub fn new(config: QuantizerConfig, prototypes: Vec<Vec<f32>>) -> Result<Self> {
        config.validate()?;
        if prototypes.len() != config.codes {
            return Err(CoreError::InvalidConfig(format!(
                "expected {} prototypes, got {}",
                config.codes,
                prototypes.len()
            )));
        }
        let mut flat = Vec::with_capacity(config.codes * config.dim);
        for proto in &prototypes {
            if proto.len() != config.dim {
                return Err(CoreError::DimensionMismatch {
                    expected: config.dim,
                    actual: proto.len(),
                });
            }
            flat.extend_from_slice(proto);
        }

        Ok(Self {
            ema_mass: vec![1.0; config.codes],
            ema_sum: flat.clone(),
            prototypes: flat,
            usage: (0..config.codes).map(|_| AtomicU64::new(0)).collect(),
            total_encodings: AtomicU64::new(0),
            config,
        })
    }

    /// Prototypes drawn uniformly from `[-1, 1)`.
    pub fn random(config: QuantizerConfig, rng: &mut impl Rng) -> Result<Self> {
        config.validate()?;
        let prototypes = (0..config.codes)
            .map(|_| (0..config.dim).map(|_| rng.random_range(-1.0..1.0)).collect())
            .collect();
        Self::new(config, prototypes)
    }

    pub fn config(&self) -> &QuantizerConfig {
        &self.config
    }

    pub fn size(&self) -> usize {
        self.config.codes
    }

    pub fn dim(&self) -> usize {
        self.config.dim
    }

    fn row(&self, code: usize) -> &[f32] {
        let d = self.config.dim;
        &self.prototypes[code * d..(code + 1) * d]
    }

    /// Length must match the dimension and every component must be finite.
    fn check_input(&self, v: &[f32]) -> Result<()> {
        if v.len() != self.config.dim {
            return Err(CoreError::DimensionMismatch {
                expected: self.config.dim,
                actual: v.len(),
            });
        }
        if let Some(index) = v.iter().position(|x| !x.is_finite()) {
            return Err(CoreError::NonFiniteComponent { index });
        }
        Ok(())
    }

    fn check_code(&self, code: u32) -> Result<usize> {
        let idx = code as usize;
        if idx >= self.config.codes {
            return Err(CoreError::CodeOutOfRange {
                code,
                size: self.config.codes,
            });
        }
        Ok(idx)
    }

    /// Full scan; returns (code, squared distance).
    fn nearest(&self, v: &[f32]) -> (usize, f32) {
        let mut best = 0;
        let mut best_dist = f32::INFINITY;
        for code in 0..self.config.codes {
            let dist = squared_distance(self.row(code), v);
            if dist < best_dist {
                best_dist = dist;
                best = code;
            }
        }
        (best, best_dist)
    }

    /// Code of the nearest prototype. Counts the encoding in usage statistics.
    pub fn quantize(&self, v: &[f32]) -> Result<u32> {
        self.check_input(v)?;
        let (code, _) = self.nearest(v);
        self.usage[code].fetch_add(1, Ordering::Relaxed);
        self.total_encodings.fetch_add(1, Ordering::Relaxed);
        Ok(code as u32)
    }

    /// Quantize, then pull the chosen prototype toward `v` by EMA.
    ///
    /// Returns the code and the commitment loss
    /// `commitment_weight × ‖v − prototype‖²` measured before the update.
    /// Only the chosen prototype changes.
    pub fn quantize_and_update(&mut self, v: &[f32]) -> Result<(u32, f32)> {
        self.check_input(v)?;
        let (code, dist) = self.nearest(v);
        self.usage[code].fetch_add(1, Ordering::Relaxed);
        self.total_encodings.fetch_add(1, Ordering::Relaxed);

        let decay = self.config.ema_decay;
        let d = self.config.dim;
        let mass = decay * self.ema_mass[code] + (1.0 - decay);
        self.ema_mass[code] = mass;

        let denom = mass + self.config.epsilon;
        let sums = &mut self.ema_sum[code * d..(code + 1) * d];
        let protos = &mut self.prototypes[code * d..(code + 1) * d];
        for ((sum, proto), &x) in sums.iter_mut().zip(protos.iter_mut()).zip(v) {
            *sum = decay * *sum + (1.0 - decay) * x;
            *proto = *sum / denom;
        }

        Ok((code as u32, self.config.commitment_weight * dist))
    }

    /// Copy of the prototype for `code`.
    pub fn decode(&self, code: u32) -> Result<Vec<f32>> {
        let idx = self.check_code(code)?;
        Ok(self.row(idx).to_vec())
    }

    /// Borrow the prototype for `code`.
    pub fn prototype(&self, code: u32) -> Result<&[f32]> {
        let idx = self.check_code(code)?;
        Ok(self.row(idx))
    }

    /// The `k` closest codes with their Euclidean distance, ascending.
    /// Does not touch usage statistics.
    pub fn nearest_codes(&self, v: &[f32], k: usize) -> Result<Vec<(u32, f32)>> {
        self.check_input(v)?;
        let mut all: Vec<(u32, f32)> = (0..self.config.codes)
            .map(|code| (code as u32, squared_distance(self.row(code), v)))
            .collect();
        all.sort_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)));
        all.truncate(k);
        for entry in &mut all {
            entry.1 = entry.1.sqrt();
        }
        Ok(all)
    }

    pub fn usage(&self, code: u32) -> Result<u64> {
        let idx = self.check_code(code)?;
        Ok(self.usage[idx].load(Ordering::Relaxed))
    }

    pub fn usage_counts(&self) -> Vec<u64> {
        self.usage.iter().map(|u| u.load(Ordering::Relaxed)).collect()
    }

    pub fn total_encodings(&self) -> u64 {
        self.total_encodings.load(Ordering::Relaxed)
    }

    /// exp(entropy) of the empirical code distribution. 0 before any encoding.
    pub fn perplexity(&self) -> f64 {
        let counts = self.usage_counts();
        let total: u64 = counts.iter().sum();
        if total == 0 {
            return 0.0;
        }
        let entropy: f64 = counts
            .iter()
            .filter(|&&c| c > 0)
            .map(|&c| {
                let p = c as f64 / total as f64;
                -p * p.ln()
            })
            .sum();
        entropy.exp()
    }

    /// Fraction of codes used at least once.
    pub fn utilization(&self) -> f64 {
        let used = self
            .usage
            .iter()
            .filter(|u| u.load(Ordering::Relaxed) > 0)
            .count();
        used as f64 / self.config.codes as f64
    }

    pub fn snapshot(&self) -> CodebookSnapshot {
        let d = self.config.dim;
        CodebookSnapshot {
            size: self.config.codes,
            dim: d,
            commitment_weight: self.config.commitment_weight,
            ema_decay: self.config.ema_decay,
            epsilon: self.config.epsilon,
            prototypes: self.prototypes.chunks(d).map(<[f32]>::to_vec).collect(),
            ema_mass: self.ema_mass.clone(),
            ema_sum: self.ema_sum.chunks(d).map(<[f32]>::to_vec).collect(),
            usage: self.usage_counts(),
            total_encodings: self.total_encodings(),
        }
    }

    /// Rebuild a quantizer from a snapshot, validating every dimension.
    pub fn from_snapshot(snapshot: CodebookSnapshot) -> Result<Self> {
        snapshot.validate()?;
        let config = snapshot.config();
        Ok(Self {
            prototypes: snapshot.prototypes.into_iter().flatten().collect(),
            ema_mass: snapshot.ema_mass,
            ema_sum: snapshot.ema_sum.into_iter().flatten().collect(),
            usage: snapshot.usage.into_iter().map(AtomicU64::new).collect(),
            total_encodings: AtomicU64::new(snapshot.total_encodings),
            config,
        })
    }

    /// Replace this codebook's state in place. The snapshot must have the
    /// same size and dimension; nothing changes on failure.
    pub fn restore(&mut self, snapshot: CodebookSnapshot) -> Result<()> {
        if snapshot.dim != self.config.dim {
            return Err(CoreError::SnapshotMismatch(format!(
                "dimension {} does not match codebook dimension {}",
                snapshot.dim, self.config.dim
            )));
        }
        if snapshot.size != self.config.codes {
            return Err(CoreError::SnapshotMismatch(format!(
                "size {} does not match codebook size {}",
                snapshot.size, self.config.codes
            )));
        }
        *self = Self::from_snapshot(snapshot)?;
        tracing::debug!(
            codes = self.config.codes,
            dim = self.config.dim,
            "codebook restored"
        );
        Ok(())
    }
}

pub(crate) fn squared_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

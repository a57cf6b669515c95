/// Minimum |weight| a connection needs to survive compaction.
pub const DEFAULT_MATERIALITY: f32 = 0.1;

/// Default codebook size (K).
pub const DEFAULT_CODEBOOK_SIZE: usize = 256;

/// Default prototype dimension (D).
pub const DEFAULT_DIM: usize = 64;

/// Scale of the diagnostic commitment loss.
pub const DEFAULT_COMMITMENT_WEIGHT: f32 = 0.25;

/// EMA decay for codebook updates.
pub const DEFAULT_EMA_DECAY: f32 = 0.99;

/// Guards the prototype division `sum / (mass + ε)`.
pub const QUANTIZER_EPSILON: f32 = 1e-5;

/// Activation threshold baseline of a regenerated neuron.
pub const THRESHOLD_BASELINE: f32 = 0.5;

/// Width of the threshold band: thresholds land in
/// `[BASELINE - SPAN/2, BASELINE + SPAN/2]`. The upper
/// bound is reached once `tanh` saturates in f32.
pub const THRESHOLD_SPAN: f32 = 0.2;

/// Half-width of the symmetric bias band around zero.
pub const BIAS_SPAN: f32 = 0.1;

/// Learning rate given to every regenerated neuron.
pub const DEFAULT_NEURON_LEARNING_RATE: f32 = 0.01;

/// Hebbian learning rate of the synapse graph.
pub const DEFAULT_GRAPH_LEARNING_RATE: f32 = 0.01;

/// Edges with |weight| below this are pruned.
pub const DEFAULT_PRUNE_THRESHOLD: f32 = 0.01;

/// Default decay factor for maintenance passes.
pub const DEFAULT_DECAY_FACTOR: f32 = 0.99;

/// Smoothing of the per-edge strength EMA.
pub const STRENGTH_SMOOTHING: f32 = 0.1;

/// Fixed per-record cost: id (16) + code (4) + importance (4) + activation
/// count (8) + cluster (8) + map header (24).
pub const RECORD_OVERHEAD_BYTES: usize = 64;

/// Per-entry cost of a sparse weight: target id (16) + weight (4), padded.
pub const EDGE_BYTES: usize = 24;

/// Fixed cost of a fully materialized neuron before its feature vector and weights.
pub const NEURON_OVERHEAD_BYTES: usize = 128;

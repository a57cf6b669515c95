//! Procedural neuron storage.
//!
//! Stores a code, not a vector; regenerates an object, not a record. A
//! learned vector quantizer turns a neuron's features into one integer code,
//! compaction keeps only its material connections, and regeneration rebuilds
//! a working neuron from the code's prototype. A sparse Hebbian synapse graph
//! tracks which connections actually get used.
//!
//! Zero I/O. Callers own persistence and scheduling.

pub mod constants;
pub mod error;
pub mod graph;
pub mod id;
pub mod neuron;
pub mod quantizer;
pub mod record;
pub mod regenerator;
pub mod shared;
pub mod snapshot;
pub mod synapse;
pub mod time;

pub use constants::{DEFAULT_DECAY_FACTOR, DEFAULT_MATERIALITY};
pub use error::{CoreError, Result};
pub use graph::{Coactivation, GraphConfig, GraphStats, PatternOutcome, SynapseGraph};
pub use id::NeuronId;
pub use neuron::{Neuron, NeuronParameters, RuntimeNeuron};
pub use quantizer::{CodebookSnapshot, QuantizerConfig, VectorQuantizer};
pub use record::{CompactNeuron, compression_ratio};
pub use regenerator::{ParameterPolicy, Regenerator, TanhPolicy, restore_bookkeeping};
pub use shared::{SharedGraph, SharedQuantizer};
pub use snapshot::{
    CURRENT_VERSION, EngineSnapshot, EngineState, WireRecord, WireWeight, export_json, import_json,
};
pub use synapse::{Synapse, SynapseRecord, SynapseType};
pub use time::now_unix_millis;

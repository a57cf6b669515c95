use std::fs;
use std::path::Path;

use engram_core::{
    EngineSnapshot, EngineState, GraphConfig, SynapseGraph, export_json, import_json,
    now_unix_millis,
};

use crate::error::{Result, StoreError};
use crate::store::Store;

impl Store {
    /// Import an engine JSON file, replacing codebook, records and graph.
    /// The file is fully validated before anything is written.
    pub fn import_json_file(&self, path: &Path, graph: SynapseGraph) -> Result<EngineState> {
        let json = fs::read_to_string(path).map_err(|e| {
            StoreError::InvalidData(format!("failed to read {}: {e}", path.display()))
        })?;
        self.import_json_str(&json, graph)
    }

    pub fn import_json_str(&self, json: &str, graph: SynapseGraph) -> Result<EngineState> {
        let state = import_json(json)?.into_state(graph)?;
        self.save_state(&state)?;
        Ok(state)
    }

    /// Capture the stored engine as a snapshot. Requires a codebook.
    pub fn snapshot(&self, graph_config: GraphConfig) -> Result<EngineSnapshot> {
        let quantizer = self
            .load_codebook()?
            .ok_or_else(|| StoreError::InvalidData("no codebook stored".into()))?;
        let records = self.load_records()?;
        let graph = self.load_graph(graph_config)?;
        Ok(EngineSnapshot::capture(
            &quantizer,
            &records,
            &graph,
            now_unix_millis(),
        ))
    }

    pub fn export_json_string(&self, graph_config: GraphConfig) -> Result<String> {
        Ok(export_json(&self.snapshot(graph_config)?)?)
    }

    pub fn export_json_file(&self, path: &Path, graph_config: GraphConfig) -> Result<()> {
        let json = self.export_json_string(graph_config)?;
        fs::write(path, json).map_err(|e| {
            StoreError::InvalidData(format!("failed to write {}: {e}", path.display()))
        })
    }
}

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};

use engram_core::{
    CodebookSnapshot, CompactNeuron, EngineState, GraphConfig, NeuronId, SynapseGraph,
    SynapseRecord, SynapseType, VectorQuantizer,
};

use crate::error::{Result, StoreError};
use crate::schema;

/// Metadata key naming the process that runs graph maintenance.
const MAINTENANCE_OWNER: &str = "maintenance_pid";

pub struct Store {
    conn: Connection,
}

impl Store {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;
        schema::initialize(&conn)?;
        tracing::info!("opened store at {}", path.display());
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize(&conn)?;
        Ok(Self { conn })
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside an IMMEDIATE transaction. The write lock is taken
    /// before `f` reads anything, so a load-modify-save in `f` cannot
    /// interleave with another writer. Commits on `Ok`, rolls back on `Err`.
    /// Store writes made from `f` join the open transaction.
    pub fn write_locked<T, E>(
        &self,
        f: impl FnOnce(&Self) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<StoreError>,
    {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .map_err(StoreError::from)?;
        let out = f(self)?;
        tx.commit().map_err(StoreError::from)?;
        Ok(out)
    }

    /// Own transaction when none is open, otherwise join the caller's.
    fn in_transaction<T>(&self, f: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        if !self.conn.is_autocommit() {
            return f(&self.conn);
        }
        let tx = self.conn.unchecked_transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // --- Metadata ---

    pub fn get_metadata(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM metadata WHERE key = ?1", [key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_metadata(&self, key: &str, value: &str) -> Result<()> {
        set_metadata_on(&self.conn, key, value)
    }

    pub fn delete_metadata(&self, key: &str) -> Result<()> {
        self.conn.execute("DELETE FROM metadata WHERE key = ?1", [key])?;
        Ok(())
    }

    /// PID recorded by a running `maintain`, if any. An unreadable value
    /// counts as no owner.
    pub fn maintenance_owner(&self) -> Result<Option<u32>> {
        let Some(value) = self.get_metadata(MAINTENANCE_OWNER)? else {
            return Ok(None);
        };
        match value.trim().parse() {
            Ok(pid) => Ok(Some(pid)),
            Err(_) => {
                tracing::warn!("ignoring unreadable maintenance owner '{value}'");
                Ok(None)
            }
        }
    }

    /// Record (`Some`) or clear (`None`) the maintenance owner.
    pub fn set_maintenance_owner(&self, pid: Option<u32>) -> Result<()> {
        match pid {
            Some(pid) => self.set_metadata(MAINTENANCE_OWNER, &pid.to_string()),
            None => self.delete_metadata(MAINTENANCE_OWNER),
        }
    }

    // --- Codebook ---

    /// Replace the stored codebook.
    pub fn save_codebook(&self, quantizer: &VectorQuantizer) -> Result<()> {
        self.in_transaction(|conn| save_codebook_on(conn, quantizer))
    }

    /// Load the codebook, or `None` if none was ever saved. Any shape
    /// inconsistency fails the whole load.
    pub fn load_codebook(&self) -> Result<Option<VectorQuantizer>> {
        let Some(size) = self.get_metadata("codebook_size")? else {
            return Ok(None);
        };
        let size: usize = parse_meta("codebook_size", &size)?;
        let dim: usize = parse_meta("codebook_dim", &self.required_metadata("codebook_dim")?)?;

        let mut stmt = self
            .conn
            .prepare("SELECT code, prototype, ema_mass, ema_sum, usage FROM codebook ORDER BY code")?;
        let rows: Vec<(i64, Vec<u8>, f64, Vec<u8>, i64)> = stmt
            .query_map([], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?
            .collect::<std::result::Result<_, _>>()?;

        let mut prototypes = Vec::with_capacity(rows.len());
        let mut ema_mass = Vec::with_capacity(rows.len());
        let mut ema_sum = Vec::with_capacity(rows.len());
        let mut usage = Vec::with_capacity(rows.len());
        for (expected, (code, proto, mass, sum, used)) in rows.into_iter().enumerate() {
            if code != expected as i64 {
                return Err(StoreError::InvalidData(format!(
                    "codebook rows not contiguous: expected code {expected}, found {code}"
                )));
            }
            prototypes.push(decode_vector(&proto)?);
            ema_mass.push(mass as f32);
            ema_sum.push(decode_vector(&sum)?);
            usage.push(used as u64);
        }

        let snapshot = CodebookSnapshot {
            size,
            dim,
            commitment_weight: parse_meta(
                "commitment_weight",
                &self.required_metadata("commitment_weight")?,
            )?,
            ema_decay: parse_meta("ema_decay", &self.required_metadata("ema_decay")?)?,
            epsilon: parse_meta("epsilon", &self.required_metadata("epsilon")?)?,
            prototypes,
            ema_mass,
            ema_sum,
            usage,
            total_encodings: parse_meta(
                "total_encodings",
                &self.required_metadata("total_encodings")?,
            )?,
        };
        Ok(Some(VectorQuantizer::from_snapshot(snapshot)?))
    }

    fn required_metadata(&self, key: &str) -> Result<String> {
        self.get_metadata(key)?
            .ok_or_else(|| StoreError::InvalidData(format!("missing metadata '{key}'")))
    }

    // --- Records ---

    /// Insert or replace records, including their weight lists.
    pub fn save_records(&self, records: &[CompactNeuron]) -> Result<()> {
        self.in_transaction(|conn| save_records_on(conn, records))
    }

    pub fn load_record(&self, id: NeuronId) -> Result<Option<CompactNeuron>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, code, importance, activation_count, cluster_id, concept_tag
                 FROM records WHERE id = ?1",
                [id.to_string()],
                record_row,
            )
            .optional()?;
        let Some(row) = row else {
            return Ok(None);
        };

        let mut stmt = self
            .conn
            .prepare("SELECT target_id, weight FROM record_weights WHERE record_id = ?1")?;
        let weights = stmt
            .query_map([id.to_string()], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, f64>(1)?))
            })?
            .map(|r| {
                let (target, weight) = r?;
                Ok((parse_id(&target)?, weight as f32))
            })
            .collect::<Result<BTreeMap<_, _>>>()?;

        Ok(Some(row.into_record(weights)?))
    }

    /// All records ordered by id.
    pub fn load_records(&self) -> Result<Vec<CompactNeuron>> {
        let mut weights: HashMap<String, BTreeMap<NeuronId, f32>> = HashMap::new();
        {
            let mut stmt = self
                .conn
                .prepare("SELECT record_id, target_id, weight FROM record_weights")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, f64>(2)?,
                ))
            })?;
            for row in rows {
                let (record_id, target, weight) = row?;
                weights
                    .entry(record_id)
                    .or_default()
                    .insert(parse_id(&target)?, weight as f32);
            }
        }

        let mut stmt = self.conn.prepare(
            "SELECT id, code, importance, activation_count, cluster_id, concept_tag
             FROM records ORDER BY id",
        )?;
        let rows: Vec<RecordRow> = stmt
            .query_map([], record_row)?
            .collect::<std::result::Result<_, _>>()?;

        rows.into_iter()
            .map(|row| {
                let w = weights.remove(&row.id).unwrap_or_default();
                row.into_record(w)
            })
            .collect()
    }

    /// Permanently forget a record. Returns whether it existed.
    pub fn delete_record(&self, id: NeuronId) -> Result<bool> {
        self.in_transaction(|conn| {
            conn.execute(
                "DELETE FROM record_weights WHERE record_id = ?1",
                [id.to_string()],
            )?;
            let rows = conn.execute("DELETE FROM records WHERE id = ?1", [id.to_string()])?;
            Ok(rows > 0)
        })
    }

    pub fn record_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM records", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    // --- Synapse graph ---

    /// Replace the stored edge list with the graph's.
    pub fn save_graph(&self, graph: &SynapseGraph) -> Result<()> {
        self.in_transaction(|conn| save_graph_on(conn, graph))
    }

    /// Load the edge list into a fresh graph with `config`.
    pub fn load_graph(&self, config: GraphConfig) -> Result<SynapseGraph> {
        let mut stmt = self.conn.prepare(
            "SELECT source_id, target_id, weight, strength, synapse_type, last_active,
                    transmission_count, plasticity_rate, is_plastic
             FROM synapses ORDER BY source_id, target_id",
        )?;
        let rows: Vec<(String, String, f64, f64, String, i64, i64, f64, i32)> = stmt
            .query_map([], |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                    row.get(4)?,
                    row.get(5)?,
                    row.get(6)?,
                    row.get(7)?,
                    row.get(8)?,
                ))
            })?
            .collect::<std::result::Result<_, _>>()?;

        let edges = rows
            .into_iter()
            .map(
                |(source, target, weight, strength, kind, last_active, count, rate, plastic)| {
                    Ok(SynapseRecord {
                        source: parse_id(&source)?,
                        target: parse_id(&target)?,
                        weight: weight as f32,
                        strength: strength as f32,
                        synapse_type: SynapseType::from_str_lossy(&kind),
                        last_active: last_active as u64,
                        transmission_count: count as u64,
                        plasticity_rate: rate as f32,
                        is_plastic: plastic != 0,
                    })
                },
            )
            .collect::<Result<Vec<_>>>()?;

        let mut graph = SynapseGraph::new(config)?;
        graph.import_edges(&edges)?;
        Ok(graph)
    }

    // --- Whole engine ---

    /// Replace codebook, records and graph in one transaction.
    pub fn save_state(&self, state: &EngineState) -> Result<()> {
        self.in_transaction(|conn| {
            save_codebook_on(conn, &state.quantizer)?;
            conn.execute_batch("DELETE FROM record_weights; DELETE FROM records;")?;
            save_records_on(conn, &state.records)?;
            save_graph_on(conn, &state.graph)
        })?;
        tracing::info!(
            records = state.records.len(),
            edges = state.graph.edge_count(),
            "saved engine state"
        );
        Ok(())
    }
}

struct RecordRow {
    id: String,
    code: i64,
    importance: f64,
    activation_count: i64,
    cluster_id: Option<u32>,
    concept_tag: Option<String>,
}

impl RecordRow {
    fn into_record(self, weights: BTreeMap<NeuronId, f32>) -> Result<CompactNeuron> {
        let code = u32::try_from(self.code)
            .map_err(|_| StoreError::InvalidData(format!("invalid code {}", self.code)))?;
        Ok(CompactNeuron {
            id: parse_id(&self.id)?,
            code,
            weights,
            importance: self.importance as f32,
            activation_count: self.activation_count as u64,
            cluster_id: self.cluster_id,
            concept_tag: self.concept_tag,
        })
    }
}

fn record_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<RecordRow> {
    Ok(RecordRow {
        id: row.get(0)?,
        code: row.get(1)?,
        importance: row.get(2)?,
        activation_count: row.get(3)?,
        cluster_id: row.get(4)?,
        concept_tag: row.get(5)?,
    })
}

fn set_metadata_on(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

fn save_codebook_on(conn: &Connection, quantizer: &VectorQuantizer) -> Result<()> {
    let snap = quantizer.snapshot();
    conn.execute("DELETE FROM codebook", [])?;
    {
        let mut stmt = conn.prepare(
            "INSERT INTO codebook (code, prototype, ema_mass, ema_sum, usage)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for code in 0..snap.size {
            stmt.execute(params![
                code as i64,
                encode_vector(&snap.prototypes[code]),
                snap.ema_mass[code] as f64,
                encode_vector(&snap.ema_sum[code]),
                snap.usage[code] as i64,
            ])?;
        }
    }

    set_metadata_on(conn, "codebook_size", &snap.size.to_string())?;
    set_metadata_on(conn, "codebook_dim", &snap.dim.to_string())?;
    set_metadata_on(conn, "commitment_weight", &snap.commitment_weight.to_string())?;
    set_metadata_on(conn, "ema_decay", &snap.ema_decay.to_string())?;
    set_metadata_on(conn, "epsilon", &snap.epsilon.to_string())?;
    set_metadata_on(conn, "total_encodings", &snap.total_encodings.to_string())?;
    Ok(())
}

fn save_records_on(conn: &Connection, records: &[CompactNeuron]) -> Result<()> {
    let mut upsert = conn.prepare(
        "INSERT INTO records (id, code, importance, activation_count, cluster_id, concept_tag)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            code = excluded.code,
            importance = excluded.importance,
            activation_count = excluded.activation_count,
            cluster_id = excluded.cluster_id,
            concept_tag = excluded.concept_tag",
    )?;
    let mut clear = conn.prepare("DELETE FROM record_weights WHERE record_id = ?1")?;
    let mut insert_weight = conn.prepare(
        "INSERT INTO record_weights (record_id, target_id, weight) VALUES (?1, ?2, ?3)",
    )?;

    for record in records {
        let id = record.id.to_string();
        upsert.execute(params![
            id,
            record.code as i64,
            record.importance as f64,
            record.activation_count as i64,
            record.cluster_id,
            record.concept_tag,
        ])?;
        clear.execute([&id])?;
        for (target, weight) in &record.weights {
            insert_weight.execute(params![id, target.to_string(), *weight as f64])?;
        }
    }
    Ok(())
}

fn save_graph_on(conn: &Connection, graph: &SynapseGraph) -> Result<()> {
    conn.execute("DELETE FROM synapses", [])?;
    let mut stmt = conn.prepare(
        "INSERT INTO synapses (source_id, target_id, weight, strength, synapse_type, last_active,
                               transmission_count, plasticity_rate, is_plastic)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
    )?;
    for edge in graph.export_edges() {
        stmt.execute(params![
            edge.source.to_string(),
            edge.target.to_string(),
            edge.weight as f64,
            edge.strength as f64,
            edge.synapse_type.as_str(),
            edge.last_active as i64,
            edge.transmission_count as i64,
            edge.plasticity_rate as f64,
            edge.is_plastic as i32,
        ])?;
    }
    Ok(())
}

fn encode_vector(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        return Err(StoreError::InvalidData(format!(
            "vector blob length {} is not a multiple of 4",
            bytes.len()
        )));
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

fn parse_meta<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .parse()
        .map_err(|_| StoreError::InvalidData(format!("invalid metadata '{key}': {value}")))
}

fn parse_id(s: &str) -> Result<NeuronId> {
    s.parse()
        .map_err(|e| StoreError::InvalidData(format!("invalid neuron id '{s}': {e}")))
}

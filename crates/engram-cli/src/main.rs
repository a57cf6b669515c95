mod input;
mod maintain;

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use engram_core::{
    Coactivation, CompactNeuron, EngineState, NeuronId, Regenerator, SynapseGraph,
    VectorQuantizer, compression_ratio, restore_bookkeeping,
};
use engram_store::{CONFIG_FILE, DB_FILE, EngineConfig, Store, default_data_dir};
use rand::SeedableRng;
use rand::rngs::SmallRng;

use crate::input::{format_vector, parse_neuron_inputs, parse_pattern, parse_vector};
use crate::maintain::MaintenanceOptions;

#[derive(Parser)]
#[command(name = "engram", about = "Procedural neuron storage: quantize, compact, regenerate")]
struct Cli {
    /// Data directory (default: $ENGRAM_DATA_DIR, then ~/.engram)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose debug output
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a random codebook and write the config file
    Init {
        #[arg(long)]
        codes: Option<usize>,
        #[arg(long)]
        dim: Option<usize>,
        /// Seed for the initial prototypes
        #[arg(long)]
        seed: Option<u64>,
        /// Replace an existing codebook, discarding records and synapses
        #[arg(long)]
        force: bool,
    },

    /// Map a feature vector to its nearest code
    Quantize {
        /// Comma-separated components
        #[arg(allow_hyphen_values = true)]
        vector: String,
        /// Also move the winning prototype toward the input
        #[arg(long)]
        learn: bool,
    },

    /// Print the prototype for a code
    Decode { code: u32 },

    /// List the k closest codes with their distances
    Nearest {
        #[arg(allow_hyphen_values = true)]
        vector: String,
        #[arg(short, default_value_t = 5)]
        k: usize,
    },

    /// Compact live neurons from a JSON file into stored records
    Compact { path: PathBuf },

    /// Rebuild a neuron from its stored record
    Regenerate { id: NeuronId },

    /// Delete a record and every synapse touching it
    Forget { id: NeuronId },

    /// Record one directed co-activation
    Coactivate {
        source: NeuronId,
        target: NeuronId,
        #[arg(long, default_value_t = 1.0)]
        source_activation: f32,
        #[arg(long, default_value_t = 1.0)]
        target_activation: f32,
    },

    /// Co-activate every pair in a pattern (`<id>` or `<id>=<activation>`)
    Pattern {
        #[arg(required = true)]
        active: Vec<String>,
    },

    /// Scale every synapse weight and drop the ones that fall below threshold
    Decay {
        #[arg(long)]
        factor: Option<f32>,
    },

    /// Remove weak synapses
    Prune,

    /// Show codebook, record and graph statistics
    Stats,

    /// Export state to a JSON file
    Export { path: PathBuf },

    /// Import state from a JSON file
    Import { path: PathBuf },

    /// Run periodic decay and prune passes over the graph
    Maintain {
        /// Stop after this many passes (default: run until ctrl-c)
        #[arg(long)]
        ticks: Option<u64>,
        #[arg(long)]
        interval_ms: Option<u64>,
        /// Apply co-activation patterns read line by line from stdin
        #[arg(long)]
        stdin: bool,
    },
}

/// Opened data directory: config plus store.
struct Engine {
    dir: PathBuf,
    config: EngineConfig,
    store: Store,
}

impl Engine {
    fn open(cli: &Cli) -> Result<Self> {
        let dir = data_dir(cli);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let config = EngineConfig::load(&dir.join(CONFIG_FILE)).context("failed to load config")?;
        let store = Store::open(&dir.join(DB_FILE)).context("failed to open store")?;
        Ok(Self { dir, config, store })
    }

    fn quantizer(&self) -> Result<VectorQuantizer> {
        self.store
            .load_codebook()
            .context("failed to load codebook")?
            .context("no codebook; run `engram init` first")
    }

    fn graph(&self) -> Result<SynapseGraph> {
        self.store
            .load_graph(self.config.graph.clone())
            .context("failed to load synapse graph")
    }

    /// Load, change and save the graph under the store's write lock.
    /// Refuses while `engram maintain` holds the graph.
    fn update_graph<T>(
        &self,
        f: impl FnOnce(&Store, &mut SynapseGraph) -> Result<T>,
    ) -> Result<T> {
        self.store.write_locked(|store| -> Result<T> {
            ensure_no_maintenance(store)?;
            let mut graph = store
                .load_graph(self.config.graph.clone())
                .context("failed to load synapse graph")?;
            let out = f(store, &mut graph)?;
            store
                .save_graph(&graph)
                .context("failed to save synapse graph")?;
            Ok(out)
        })
    }
}

/// Fail while a live `engram maintain` owns the graph. A claim left by a
/// dead process is cleared.
fn ensure_no_maintenance(store: &Store) -> Result<()> {
    let Some(pid) = store
        .maintenance_owner()
        .context("failed to read maintenance owner")?
    else {
        return Ok(());
    };
    if is_process_alive(pid) {
        bail!("graph maintenance is running (PID {pid}); stop it before changing the graph");
    }
    tracing::info!("cleared stale maintenance claim (PID {pid} is dead)");
    store.set_maintenance_owner(None)?;
    Ok(())
}

#[cfg(unix)]
fn is_process_alive(pid: u32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // kill(pid, 0) checks existence without sending a signal
    unsafe { libc::kill(pid, 0) == 0 }
}

#[cfg(not(unix))]
fn is_process_alive(_pid: u32) -> bool {
    false // conservative: assume dead on non-unix
}

fn data_dir(cli: &Cli) -> PathBuf {
    cli.data_dir
        .clone()
        .or_else(|| std::env::var("ENGRAM_DATA_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(default_data_dir)
}

fn init_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(tracing::Level::WARN.into())
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let engine = Engine::open(&cli)?;
    match &cli.command {
        Commands::Init {
            codes,
            dim,
            seed,
            force,
        } => cmd_init(engine, *codes, *dim, *seed, *force),
        Commands::Quantize { vector, learn } => cmd_quantize(&engine, vector, *learn),
        Commands::Decode { code } => cmd_decode(&engine, *code),
        Commands::Nearest { vector, k } => cmd_nearest(&engine, vector, *k),
        Commands::Compact { path } => cmd_compact(&engine, path),
        Commands::Regenerate { id } => cmd_regenerate(&engine, *id),
        Commands::Forget { id } => cmd_forget(&engine, *id),
        Commands::Coactivate {
            source,
            target,
            source_activation,
            target_activation,
        } => cmd_coactivate(
            &engine,
            *source,
            *target,
            *source_activation,
            *target_activation,
        ),
        Commands::Pattern { active } => cmd_pattern(&engine, active),
        Commands::Decay { factor } => cmd_decay(&engine, *factor),
        Commands::Prune => cmd_prune(&engine),
        Commands::Stats => cmd_stats(&engine),
        Commands::Export { path } => cmd_export(&engine, path),
        Commands::Import { path } => cmd_import(&engine, path),
        Commands::Maintain {
            ticks,
            interval_ms,
            stdin,
        } => cmd_maintain(&engine, *ticks, *interval_ms, *stdin).await,
    }
}

fn cmd_init(
    mut engine: Engine,
    codes: Option<usize>,
    dim: Option<usize>,
    seed: Option<u64>,
    force: bool,
) -> Result<()> {
    let existing = engine
        .store
        .load_codebook()
        .context("failed to check for an existing codebook")?;
    if existing.is_some() && !force {
        bail!(
            "codebook already exists in {}; pass --force to replace it",
            engine.dir.display()
        );
    }

    if let Some(codes) = codes {
        engine.config.quantizer.codes = codes;
    }
    if let Some(dim) = dim {
        engine.config.quantizer.dim = dim;
    }
    engine.config.validate().context("invalid configuration")?;
    engine
        .config
        .save(&engine.dir.join(CONFIG_FILE))
        .context("failed to write config")?;

    let mut rng = match seed {
        Some(seed) => SmallRng::seed_from_u64(seed),
        None => SmallRng::from_os_rng(),
    };
    let quantizer = VectorQuantizer::random(engine.config.quantizer.clone(), &mut rng)
        .context("failed to build codebook")?;

    if existing.is_some() {
        // Old records may reference codes the new codebook lacks.
        let state = EngineState {
            quantizer,
            records: Vec::new(),
            graph: SynapseGraph::new(engine.config.graph.clone())?,
        };
        engine.store.write_locked(|store| -> Result<()> {
            ensure_no_maintenance(store)?;
            store.save_state(&state).context("failed to reset store")
        })?;
        println!("replaced codebook and cleared records and synapses");
    } else {
        engine
            .store
            .save_codebook(&quantizer)
            .context("failed to save codebook")?;
    }

    println!(
        "initialized {} codes x {} dims in {}",
        engine.config.quantizer.codes,
        engine.config.quantizer.dim,
        engine.dir.display()
    );
    Ok(())
}

fn cmd_quantize(engine: &Engine, vector: &str, learn: bool) -> Result<()> {
    let v = parse_vector(vector)?;
    let mut quantizer = engine.quantizer()?;

    if learn {
        let (code, loss) = quantizer.quantize_and_update(&v)?;
        println!("code: {code}");
        println!("loss: {loss:.6}");
    } else {
        let code = quantizer.quantize(&v)?;
        println!("code: {code}");
    }

    // Usage counters move on every encoding, learned or not.
    engine
        .store
        .save_codebook(&quantizer)
        .context("failed to save codebook")?;
    Ok(())
}

fn cmd_decode(engine: &Engine, code: u32) -> Result<()> {
    let prototype = engine.quantizer()?.decode(code)?;
    println!("{}", format_vector(&prototype));
    Ok(())
}

fn cmd_nearest(engine: &Engine, vector: &str, k: usize) -> Result<()> {
    let v = parse_vector(vector)?;
    for (code, distance) in engine.quantizer()?.nearest_codes(&v, k)? {
        println!("{code}\t{distance:.6}");
    }
    Ok(())
}

fn cmd_compact(engine: &Engine, path: &Path) -> Result<()> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let inputs = parse_neuron_inputs(&json)?;
    let quantizer = engine.quantizer()?;
    let regenerator = Regenerator::new(&quantizer);
    let materiality = engine.config.compaction.materiality;

    let mut records = Vec::with_capacity(inputs.len());
    let mut ratio_sum = 0.0;
    for (i, input) in inputs.iter().enumerate() {
        let code = quantizer
            .quantize(&input.features)
            .with_context(|| format!("failed to quantize neuron #{i}"))?;
        let neuron = input.to_neuron(regenerator.parameters(code)?);
        let record = CompactNeuron::compact(&neuron, code, materiality);
        let ratio = compression_ratio(neuron.estimated_bytes(quantizer.dim()), &record);
        ratio_sum += ratio;
        println!(
            "{}\tcode {}\tkept {}/{} edges\t{:.1}x",
            record.id,
            record.code,
            record.edge_count(),
            neuron.weights.len(),
            ratio
        );
        records.push(record);
    }

    engine
        .store
        .save_records(&records)
        .context("failed to save records")?;
    engine
        .store
        .save_codebook(&quantizer)
        .context("failed to save codebook")?;

    let mean = if records.is_empty() {
        0.0
    } else {
        ratio_sum / records.len() as f64
    };
    println!("compacted {} neurons, mean compression {mean:.1}x", records.len());
    Ok(())
}

fn cmd_regenerate(engine: &Engine, id: NeuronId) -> Result<()> {
    let record = engine
        .store
        .load_record(id)
        .context("failed to load record")?
        .with_context(|| format!("no record for {id}"))?;
    let quantizer = engine.quantizer()?;
    let mut neuron = Regenerator::new(&quantizer).regenerate(&record)?;
    restore_bookkeeping(&mut neuron, &record);

    println!("id:          {}", neuron.id);
    println!("code:        {}", record.code);
    println!("threshold:   {:.6}", neuron.threshold);
    println!("bias:        {:.6}", neuron.bias);
    println!("activations: {}", neuron.activation_count);
    println!("edges:       {}", neuron.weights.len());
    let mut weights: Vec<_> = neuron.weights.iter().collect();
    weights.sort_by_key(|(target, _)| **target);
    for (target, weight) in weights {
        println!("  -> {target}\t{weight:.6}");
    }
    Ok(())
}

fn cmd_forget(engine: &Engine, id: NeuronId) -> Result<()> {
    let (deleted, edges) = engine.update_graph(|store, graph| {
        let deleted = store.delete_record(id).context("failed to delete record")?;
        let edges = graph.remove_neuron(id);
        if !deleted && edges == 0 {
            bail!("unknown neuron {id}");
        }
        Ok((deleted, edges))
    })?;
    println!(
        "forgot {id}: record {}, {edges} synapses removed",
        if deleted { "deleted" } else { "absent" }
    );
    Ok(())
}

fn cmd_coactivate(
    engine: &Engine,
    source: NeuronId,
    target: NeuronId,
    source_activation: f32,
    target_activation: f32,
) -> Result<()> {
    let outcome = engine.update_graph(|_, graph| {
        Ok(graph.record_coactivation(source, target, source_activation, target_activation))
    })?;
    match outcome {
        Coactivation::Created(w) => println!("created: weight {w:.6}"),
        Coactivation::Updated(w) => println!("updated: weight {w:.6}"),
        Coactivation::Ignored => println!("ignored"),
    }
    Ok(())
}

fn cmd_pattern(engine: &Engine, active: &[String]) -> Result<()> {
    let active = parse_pattern(active.iter().map(String::as_str))?;
    let outcome = engine.update_graph(|_, graph| Ok(graph.record_coactivation_pattern(&active)))?;
    println!("created: {}, updated: {}", outcome.created, outcome.updated);
    Ok(())
}

fn cmd_decay(engine: &Engine, factor: Option<f32>) -> Result<()> {
    let factor = factor.unwrap_or(engine.config.maintenance.decay_factor);
    if !(0.0..=1.0).contains(&factor) {
        bail!("decay factor must be in [0, 1], got {factor}");
    }
    let (removed, edges) =
        engine.update_graph(|_, graph| Ok((graph.apply_decay(factor), graph.edge_count())))?;
    println!("removed: {removed}");
    println!("edges: {edges}");
    Ok(())
}

fn cmd_prune(engine: &Engine) -> Result<()> {
    let (removed, edges) =
        engine.update_graph(|_, graph| Ok((graph.prune_weak_synapses(), graph.edge_count())))?;
    println!("pruned: {removed}");
    println!("edges: {edges}");
    Ok(())
}

fn cmd_stats(engine: &Engine) -> Result<()> {
    match engine.store.load_codebook().context("failed to load codebook")? {
        Some(q) => {
            println!("codes:       {}", q.size());
            println!("dim:         {}", q.dim());
            println!("encodings:   {}", q.total_encodings());
            println!("perplexity:  {:.3}", q.perplexity());
            println!("utilization: {:.3}", q.utilization());
        }
        None => println!("codebook:    none"),
    }
    let records = engine.store.record_count().context("failed to count records")?;
    let graph = engine.graph()?.stats();
    println!("records:     {records}");
    println!("neurons:     {}", graph.neuron_count);
    println!("edges:       {}", graph.edge_count);
    println!(
        "weights:     mean={:.4}, min={:.4}, max={:.4}",
        graph.mean_weight, graph.min_weight, graph.max_weight
    );
    println!("sparsity:    {:.6}", graph.sparsity);
    Ok(())
}

fn cmd_export(engine: &Engine, path: &Path) -> Result<()> {
    engine
        .store
        .export_json_file(path, engine.config.graph.clone())
        .context("failed to export state")?;
    println!("exported to {}", path.display());
    Ok(())
}

fn cmd_import(engine: &Engine, path: &Path) -> Result<()> {
    let graph = SynapseGraph::new(engine.config.graph.clone())?;
    let state = engine.store.write_locked(|store| -> Result<EngineState> {
        ensure_no_maintenance(store)?;
        store
            .import_json_file(path, graph)
            .context("failed to import JSON")
    })?;
    println!(
        "imported from {}: codes={}, records={}, synapses={}",
        path.display(),
        state.quantizer.size(),
        state.records.len(),
        state.graph.edge_count()
    );
    Ok(())
}

async fn cmd_maintain(
    engine: &Engine,
    ticks: Option<u64>,
    interval_ms: Option<u64>,
    stdin: bool,
) -> Result<()> {
    let interval_ms = interval_ms.unwrap_or(engine.config.maintenance.interval_ms);
    if interval_ms == 0 {
        bail!("--interval-ms must be positive");
    }
    let options = MaintenanceOptions {
        decay_factor: engine.config.maintenance.decay_factor,
        interval: Duration::from_millis(interval_ms),
        ticks,
        read_stdin: stdin,
    };

    // The claim is written in the same transaction that loads the graph, so
    // no other writer can slip in between load and claim.
    let pid = std::process::id();
    let graph = engine.store.write_locked(|store| -> Result<SynapseGraph> {
        ensure_no_maintenance(store)?;
        store.set_maintenance_owner(Some(pid))?;
        engine.graph()
    })?;
    tracing::info!(pid, "claimed graph maintenance");

    let outcome = maintain::run(graph, options).await;
    let released = engine.store.write_locked(|store| -> Result<()> {
        if let Ok((graph, _)) = &outcome {
            store
                .save_graph(graph)
                .context("failed to save synapse graph")?;
        }
        store.set_maintenance_owner(None)?;
        Ok(())
    });
    let (_, report) = outcome?;
    released.context("failed to release graph maintenance")?;

    println!(
        "ticks: {}, decayed: {}, pruned: {}",
        report.ticks, report.decayed, report.pruned
    );
    if stdin {
        println!(
            "patterns: {}, created: {}, updated: {}",
            report.patterns, report.created, report.updated
        );
    }
    println!("edges: {}", report.stats.edge_count);
    Ok(())
}

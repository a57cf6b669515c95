//! CLI command integration tests.
//! Each test uses a temp directory via ENGRAM_DATA_DIR for full isolation.

use std::process::Stdio;
use std::time::{Duration, Instant};

use assert_cmd::Command;
use engram_store::Store;
use predicates::prelude::*;
use tempfile::TempDir;

const A: &str = "00000000-0000-0000-0000-00000000000a";
const B: &str = "00000000-0000-0000-0000-00000000000b";
const C: &str = "00000000-0000-0000-0000-00000000000c";

fn engram_cmd(data_dir: &TempDir) -> Command {
    #[allow(deprecated)]
    let mut cmd = Command::cargo_bin("engram").unwrap();
    cmd.env("ENGRAM_DATA_DIR", data_dir.path());
    cmd
}

fn init(dir: &TempDir) {
    engram_cmd(dir)
        .args(["init", "--codes", "4", "--dim", "2", "--seed", "7"])
        .assert()
        .success()
        .stdout(predicate::str::contains("initialized 4 codes x 2 dims"));
}

/// Fast-learning graph so single co-activations survive a prune.
fn write_graph_config(dir: &TempDir) {
    std::fs::write(
        dir.path().join("engram.toml"),
        "[graph]\nlearning_rate = 0.5\n\n[maintenance]\ndecay_factor = 0.5\n",
    )
    .unwrap();
}

/// Record `pid` as the maintenance owner, as a running `maintain` does.
fn claim_maintenance(dir: &TempDir, pid: u32) {
    let store = Store::open(&dir.path().join("engram.db")).unwrap();
    store.set_maintenance_owner(Some(pid)).unwrap();
}

fn maintenance_owner(dir: &TempDir) -> Option<u32> {
    let path = dir.path().join("engram.db");
    if !path.exists() {
        return None;
    }
    Store::open(&path).ok()?.maintenance_owner().ok()?
}

fn stdout_of(cmd: &mut Command) -> String {
    let output = cmd.output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn extract_stat_value<'a>(stdout: &'a str, label: &str) -> &'a str {
    stdout
        .lines()
        .find(|line| line.starts_with(label))
        .and_then(|line| line[label.len()..].split_whitespace().next())
        .unwrap_or("")
}

#[test]
fn stats_fresh_dir() {
    let dir = TempDir::new().unwrap();
    engram_cmd(&dir)
        .arg("stats")
        .assert()
        .success()
        .stdout(predicate::str::contains("codebook:    none"))
        .stdout(predicate::str::contains("records:     0"))
        .stdout(predicate::str::contains("edges:       0"));
}

#[test]
fn init_writes_config_and_codebook() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    assert!(dir.path().join("engram.toml").exists());
    assert!(dir.path().join("engram.db").exists());

    let stdout = stdout_of(engram_cmd(&dir).arg("stats"));
    assert_eq!(extract_stat_value(&stdout, "codes:"), "4");
    assert_eq!(extract_stat_value(&stdout, "dim:"), "2");
    assert_eq!(extract_stat_value(&stdout, "encodings:"), "0");
}

#[test]
fn init_twice_requires_force() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    engram_cmd(&dir)
        .args(["init", "--codes", "4", "--dim", "2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
    engram_cmd(&dir)
        .args(["init", "--codes", "8", "--dim", "2", "--force"])
        .assert()
        .success()
        .stdout(predicate::str::contains("replaced codebook"));
}

#[test]
fn quantize_without_codebook_fails() {
    let dir = TempDir::new().unwrap();
    engram_cmd(&dir)
        .args(["quantize", "0.1,0.2"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("engram init"));
}

#[test]
fn quantize_decode_and_nearest() {
    let dir = TempDir::new().unwrap();
    init(&dir);

    let stdout = stdout_of(engram_cmd(&dir).args(["quantize", "-0.1,0.2"]));
    let code = extract_stat_value(&stdout, "code:").to_string();
    let code_num: u32 = code.parse().unwrap();
    assert!(code_num < 4);

    let decoded = stdout_of(engram_cmd(&dir).args(["decode", &code]));
    assert_eq!(decoded.trim().split(',').count(), 2);

    let nearest = stdout_of(engram_cmd(&dir).args(["nearest", "-0.1,0.2", "-k", "3"]));
    let lines: Vec<&str> = nearest.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with(&format!("{code}\t")));

    let stats = stdout_of(engram_cmd(&dir).arg("stats"));
    assert_eq!(extract_stat_value(&stats, "encodings:"), "1");
}

#[test]
fn quantize_learn_reports_loss() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    engram_cmd(&dir)
        .args(["quantize", "0.5,0.5", "--learn"])
        .assert()
        .success()
        .stdout(predicate::str::contains("code: "))
        .stdout(predicate::str::contains("loss: "));
}

#[test]
fn quantize_wrong_dimension_fails() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    engram_cmd(&dir)
        .args(["quantize", "0.1,0.2,0.3"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("dimension"));
}

#[test]
fn decode_out_of_range_fails() {
    let dir = TempDir::new().unwrap();
    init(&dir);
    engram_cmd(&dir).args(["decode", "4"]).assert().failure();
}

#[test]
fn compact_regenerate_forget() {
    let dir = TempDir::new().unwrap();
    init(&dir);

    let input = dir.path().join("neurons.json");
    std::fs::write(
        &input,
        format!(
            r#"[
                {{"id": "{A}", "features": [0.3, -0.2],
                  "weights": [{{"target": "{B}", "weight": 0.8}}, {{"target": "{C}", "weight": 0.05}}],
                  "activationCount": 12, "concepts": ["river"]}},
                {{"id": "{B}", "features": [0.9, 0.9]}}
            ]"#
        ),
    )
    .unwrap();

    engram_cmd(&dir)
        .arg("compact")
        .arg(&input)
        .assert()
        .success()
        .stdout(predicate::str::contains("kept 1/2 edges"))
        .stdout(predicate::str::contains("compacted 2 neurons"));

    let stdout = stdout_of(engram_cmd(&dir).args(["regenerate", A]));
    assert_eq!(extract_stat_value(&stdout, "edges:"), "1");
    assert_eq!(extract_stat_value(&stdout, "activations:"), "12");
    let threshold: f32 = extract_stat_value(&stdout, "threshold:").parse().unwrap();
    assert!((0.4..=0.6).contains(&threshold));
    assert!(stdout.contains(B));

    engram_cmd(&dir)
        .args(["forget", A])
        .assert()
        .success()
        .stdout(predicate::str::contains("record deleted"));
    engram_cmd(&dir)
        .args(["regenerate", A])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no record"));

    let stats = stdout_of(engram_cmd(&dir).arg("stats"));
    assert_eq!(extract_stat_value(&stats, "records:"), "1");
}

#[test]
fn forget_unknown_fails() {
    let dir = TempDir::new().unwrap();
    engram_cmd(&dir)
        .args(["forget", C])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown neuron"));
}

#[test]
fn pattern_decay_prune_flow() {
    let dir = TempDir::new().unwrap();
    write_graph_config(&dir);

    engram_cmd(&dir)
        .args(["pattern", A, &format!("{B}=1.0"), &format!("{C}=0.5")])
        .assert()
        .success()
        .stdout(predicate::str::contains("created: 6, updated: 0"));

    engram_cmd(&dir)
        .args(["coactivate", A, B])
        .assert()
        .success()
        .stdout(predicate::str::contains("updated: weight 1.000000"));

    engram_cmd(&dir)
        .args(["coactivate", A, A])
        .assert()
        .success()
        .stdout(predicate::str::contains("ignored"));

    // A↔B at 1.0 (A→B) / 0.5 (B→A); pairs with C at 0.25.
    engram_cmd(&dir)
        .args(["decay", "--factor", "0.03"])
        .assert()
        .success()
        .stdout(predicate::str::contains("removed: 4"))
        .stdout(predicate::str::contains("edges: 2"));

    engram_cmd(&dir)
        .arg("prune")
        .assert()
        .success()
        .stdout(predicate::str::contains("pruned: 0"))
        .stdout(predicate::str::contains("edges: 2"));

    engram_cmd(&dir)
        .args(["decay", "--factor", "2.0"])
        .assert()
        .failure();
}

#[test]
fn export_import_roundtrip() {
    let source = TempDir::new().unwrap();
    init(&source);
    write_graph_config(&source);
    engram_cmd(&source)
        .args(["pattern", A, B])
        .assert()
        .success();

    let export_path = source.path().join("export.json");
    engram_cmd(&source)
        .arg("export")
        .arg(&export_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("exported to"));

    let json = std::fs::read_to_string(&export_path).unwrap();
    assert!(json.contains("\"codebook\""));
    assert!(json.contains("\"synapses\""));

    let target = TempDir::new().unwrap();
    engram_cmd(&target)
        .arg("import")
        .arg(&export_path)
        .assert()
        .success()
        .stdout(predicate::str::contains("codes=4, records=0, synapses=2"));

    let stats = stdout_of(engram_cmd(&target).arg("stats"));
    assert_eq!(extract_stat_value(&stats, "codes:"), "4");
    assert_eq!(extract_stat_value(&stats, "edges:"), "2");
}

#[test]
fn import_invalid_json_fails() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("bad.json");
    std::fs::write(&path, "{\"version\": \"1.0\"}").unwrap();
    engram_cmd(&dir).arg("import").arg(&path).assert().failure();
}

#[test]
fn maintain_runs_fixed_ticks() {
    let dir = TempDir::new().unwrap();
    write_graph_config(&dir);
    engram_cmd(&dir).args(["pattern", A, B]).assert().success();

    engram_cmd(&dir)
        .args(["maintain", "--ticks", "2", "--interval-ms", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("ticks: 2, decayed: 0, pruned: 0"))
        .stdout(predicate::str::contains("edges: 2"));
}

#[test]
fn maintain_applies_stdin_patterns() {
    let dir = TempDir::new().unwrap();
    write_graph_config(&dir);

    engram_cmd(&dir)
        .args(["maintain", "--ticks", "1", "--interval-ms", "500", "--stdin"])
        .write_stdin(format!("{A} {B}\n"))
        .assert()
        .success()
        .stdout(predicate::str::contains("patterns: 1, created: 2, updated: 0"))
        .stdout(predicate::str::contains("edges: 2"));

    let stats = stdout_of(engram_cmd(&dir).arg("stats"));
    assert_eq!(extract_stat_value(&stats, "edges:"), "2");
}

#[cfg(unix)]
#[test]
fn live_maintenance_blocks_graph_writers() {
    let dir = TempDir::new().unwrap();
    write_graph_config(&dir);
    engram_cmd(&dir).args(["pattern", A, B]).assert().success();
    // The test process stays alive for the whole test.
    claim_maintenance(&dir, std::process::id());

    let writers: [&[&str]; 6] = [
        &["coactivate", A, C],
        &["pattern", A, C],
        &["decay"],
        &["prune"],
        &["forget", A],
        &["maintain", "--ticks", "0"],
    ];
    for args in writers {
        engram_cmd(&dir)
            .args(args)
            .assert()
            .failure()
            .stderr(predicate::str::contains("graph maintenance is running"));
    }

    let stats = stdout_of(engram_cmd(&dir).arg("stats"));
    assert_eq!(extract_stat_value(&stats, "edges:"), "2");
    assert_eq!(maintenance_owner(&dir), Some(std::process::id()));
}

#[test]
fn stale_maintenance_claim_is_cleared() {
    let dir = TempDir::new().unwrap();
    write_graph_config(&dir);
    claim_maintenance(&dir, 999_999_999);

    engram_cmd(&dir)
        .args(["coactivate", A, B])
        .assert()
        .success()
        .stdout(predicate::str::contains("created: weight 0.500000"));
    assert_eq!(maintenance_owner(&dir), None);

    engram_cmd(&dir)
        .args(["maintain", "--ticks", "1", "--interval-ms", "10"])
        .assert()
        .success()
        .stdout(predicate::str::contains("edges: 1"));
    assert_eq!(maintenance_owner(&dir), None);
}

#[cfg(unix)]
#[test]
fn writes_during_maintain_are_refused_not_lost() {
    let dir = TempDir::new().unwrap();
    write_graph_config(&dir);
    engram_cmd(&dir).args(["pattern", A, B]).assert().success();

    #[allow(deprecated)]
    let bin = assert_cmd::cargo::cargo_bin("engram");
    let maintain = std::process::Command::new(bin)
        .env("ENGRAM_DATA_DIR", dir.path())
        .args(["maintain", "--ticks", "1", "--interval-ms", "3000"])
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();

    let deadline = Instant::now() + Duration::from_secs(10);
    while maintenance_owner(&dir) != Some(maintain.id()) {
        assert!(Instant::now() < deadline, "maintain never claimed the graph");
        std::thread::sleep(Duration::from_millis(20));
    }

    engram_cmd(&dir)
        .args(["coactivate", A, C])
        .assert()
        .failure()
        .stderr(predicate::str::contains(format!(
            "graph maintenance is running (PID {})",
            maintain.id()
        )));

    let output = maintain.wait_with_output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let report = String::from_utf8_lossy(&output.stdout);
    assert!(report.contains("ticks: 1, decayed: 0, pruned: 0"), "{report}");
    assert_eq!(maintenance_owner(&dir), None);

    // Released: a write after maintain exits sticks alongside the maintained edges.
    engram_cmd(&dir)
        .args(["coactivate", A, C])
        .assert()
        .success()
        .stdout(predicate::str::contains("created: weight 0.500000"));
    let stats = stdout_of(engram_cmd(&dir).arg("stats"));
    assert_eq!(extract_stat_value(&stats, "edges:"), "3");
}

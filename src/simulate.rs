//! Replicate simulation under a fitted model.
//!
//! The preferred route is to reuse the simulation command the tool itself
//! prints into its report: that command encodes the exact estimated
//! parameters, so replicates match the fit precisely. It targets the
//! tool's default output names, though, so it is tokenized and retargeted
//! (output prefix, replicate count, seed, length, threads) before running.
//! When the report carries no such command, the arguments are rebuilt from
//! the fit record alone.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::command::{replace_or_append, tokenize};
use crate::fit::FitRecord;
use crate::invoke::{PowerError, ToolInstallation};
use crate::report::{self, ReplayVariant};

/// Basename prefix of simulated replicate files.
pub const SIM_FILE_PREFIX: &str = "rep";

/// Alignment file extensions the simulator is known to emit.
const SIM_EXTENSIONS: [&str; 4] = ["fa", "fasta", "phy", "nex"];

// Flags rewritten or forced on every simulation command.
const SIM_FLAG: &str = "--alisim";
const COUNT_FLAG: &str = "--num-alignments";
const SEED_FLAG: &str = "--seed";
const LENGTH_FLAG: &str = "--length";
const THREADS_FLAG: &str = "-T";
const REDO_FLAG: &str = "--redo";
const ALIGNMENT_FLAG: &str = "-s";
const TREE_FLAG: &str = "-t";
const MODEL_FLAG: &str = "-m";

/// Inputs of one simulation round.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Empirical alignment; forced onto plain replay commands so the
    /// simulated replicates reproduce its gap pattern.
    pub alignment: PathBuf,
    /// Alignment columns to simulate when building a command from scratch.
    pub site_count: usize,
    /// Number of replicate alignments to produce.
    pub replicates: usize,
    /// Simulation seed.
    pub seed: u64,
    /// Threads per invocation.
    pub threads: u32,
    /// Wall-clock budget for the whole simulation run.
    pub timeout: Duration,
}

// ---------------------------------------------------------------------------
// Strategy selection
// ---------------------------------------------------------------------------

/// How the simulation arguments are obtained, in preference order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    /// Replay the report's gap-copying command.
    ReplayMimic,
    /// Replay the report's plain command, forcing the empirical alignment
    /// on so its gap pattern carries over.
    ReplayPlain,
    /// Rebuild the command from the fit record alone.
    Construct,
}

const STRATEGIES: [Strategy; 3] = [
    Strategy::ReplayMimic,
    Strategy::ReplayPlain,
    Strategy::Construct,
];

impl Strategy {
    fn describe(self) -> &'static str {
        match self {
            Strategy::ReplayMimic => "replayed gap-copying report command",
            Strategy::ReplayPlain => "replayed plain report command",
            Strategy::Construct => "constructed from fit record",
        }
    }
}

/// First applicable strategy's argument list.
fn select_args(
    fit: &FitRecord,
    cfg: &SimConfig,
    sim_prefix: &Path,
) -> Result<(Strategy, Vec<String>), PowerError> {
    for strategy in STRATEGIES {
        if let Some(args) = strategy_args(strategy, fit, cfg, sim_prefix)? {
            return Ok((strategy, args));
        }
        log::debug!("simulation strategy not applicable: {}", strategy.describe());
    }
    // Construct never declines, so this is unreachable in practice.
    Err(PowerError::Parse("no simulation strategy applicable".to_string()))
}

/// Arguments for one strategy, or `None` when it does not apply.
fn strategy_args(
    strategy: Strategy,
    fit: &FitRecord,
    cfg: &SimConfig,
    sim_prefix: &Path,
) -> Result<Option<Vec<String>>, PowerError> {
    match strategy {
        Strategy::ReplayMimic => {
            let line = report::parse_replay_command(&fit.report_path, ReplayVariant::MimicGaps)?;
            Ok(line.map(|l| retarget(&strip_program(tokenize(&l)), cfg, sim_prefix)))
        }
        Strategy::ReplayPlain => {
            let line = report::parse_replay_command(&fit.report_path, ReplayVariant::Plain)?;
            Ok(line.map(|l| {
                let tokens = retarget(&strip_program(tokenize(&l)), cfg, sim_prefix);
                let alignment = cfg.alignment.display().to_string();
                replace_or_append(&tokens, ALIGNMENT_FLAG, &alignment, false)
            }))
        }
        Strategy::Construct => {
            if !fit.tree_path.exists() {
                return Err(PowerError::MissingTree {
                    path: fit.tree_path.clone(),
                });
            }
            Ok(Some(construct_args(fit, cfg, sim_prefix)))
        }
    }
}

/// Retarget a replayed command at this run's namespace and parameters.
fn retarget(tokens: &[String], cfg: &SimConfig, sim_prefix: &Path) -> Vec<String> {
    let mut t = replace_or_append(tokens, SIM_FLAG, &sim_prefix.display().to_string(), false);
    t = replace_or_append(&t, COUNT_FLAG, &cfg.replicates.to_string(), false);
    t = replace_or_append(&t, SEED_FLAG, &cfg.seed.to_string(), false);
    t = replace_or_append(&t, LENGTH_FLAG, &cfg.site_count.to_string(), false);
    t = replace_or_append(&t, THREADS_FLAG, &cfg.threads.to_string(), false);
    replace_or_append(&t, REDO_FLAG, "", true)
}

/// Drop a leading program name. Replayed mimic lines start with the tool's
/// own binary name rather than a flag.
fn strip_program(tokens: Vec<String>) -> Vec<String> {
    match tokens.first() {
        Some(first) if !first.starts_with('-') => tokens[1..].to_vec(),
        _ => tokens,
    }
}

/// Simulation arguments built purely from the fit record; no report text
/// is consulted and no gap-copying alignment flag is emitted.
fn construct_args(fit: &FitRecord, cfg: &SimConfig, sim_prefix: &Path) -> Vec<String> {
    vec![
        SIM_FLAG.to_string(),
        sim_prefix.display().to_string(),
        TREE_FLAG.to_string(),
        fit.tree_path.display().to_string(),
        MODEL_FLAG.to_string(),
        fit.model.clone(),
        LENGTH_FLAG.to_string(),
        cfg.site_count.to_string(),
        COUNT_FLAG.to_string(),
        cfg.replicates.to_string(),
        SEED_FLAG.to_string(),
        cfg.seed.to_string(),
        THREADS_FLAG.to_string(),
        cfg.threads.to_string(),
        REDO_FLAG.to_string(),
    ]
}

// ---------------------------------------------------------------------------
// Simulation run and output collection
// ---------------------------------------------------------------------------

/// Simulate replicate alignments under `fit`'s model into `sim_dir`.
///
/// Returns the replicate files found afterwards, lexicographically sorted
/// for determinism. Zero outputs is an error; a count differing from the
/// request is only warned about, and whatever exists is returned.
pub fn simulate(
    tool: &ToolInstallation,
    fit: &FitRecord,
    cfg: &SimConfig,
    sim_dir: &Path,
) -> Result<Vec<PathBuf>, PowerError> {
    fs::create_dir_all(sim_dir)?;
    let sim_prefix = sim_dir.join(SIM_FILE_PREFIX);

    let (strategy, args) = select_args(fit, cfg, &sim_prefix)?;
    log::info!(
        "simulating {} replicates under {} ({})",
        cfg.replicates,
        fit.model,
        strategy.describe()
    );
    tool.invoke(&args, cfg.timeout)?;

    let mut found = scan_outputs(sim_dir)?;
    if found.is_empty() {
        return Err(PowerError::NoSimulationOutput {
            dir: sim_dir.to_path_buf(),
        });
    }
    if found.len() != cfg.replicates {
        log::warn!(
            "expected {} simulated alignments in {}, found {}; continuing with what exists",
            cfg.replicates,
            sim_dir.display(),
            found.len()
        );
    }
    found.sort();
    Ok(found)
}

/// Collect simulated replicate files: `{prefix}_{index}.{ext}` with a
/// known alignment extension.
fn scan_outputs(dir: &Path) -> Result<Vec<PathBuf>, PowerError> {
    let mut found = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if is_replicate_file(&path) {
            found.push(path);
        }
    }
    Ok(found)
}

fn is_replicate_file(path: &Path) -> bool {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return false,
    };
    let rest = match name
        .strip_prefix(SIM_FILE_PREFIX)
        .and_then(|r| r.strip_prefix('_'))
    {
        Some(rest) => rest,
        None => return false,
    };
    match rest.rsplit_once('.') {
        Some((index, ext)) => {
            !index.is_empty()
                && index.bytes().all(|b| b.is_ascii_digit())
                && SIM_EXTENSIONS.contains(&ext)
        }
        None => false,
    }
}

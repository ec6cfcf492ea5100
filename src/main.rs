//! mixpower CLI: parametric-bootstrap power estimation for phylogenetic
//! mixture-model selection.
//!
//! Typical run:
//!   mixpower --alignment=data.fasta --k-values=1,2,3 --replicates=100
//!
//! Options:
//!   --alignment=<file>     Empirical alignment (FASTA or PHYLIP), required
//!   --tool=<path>          Inference tool binary (default: probe iqtree2, iqtree)
//!   --base-model=<name>    Substitution model the mixture extends (default: GTR+F)
//!   --family=<name>        Mixture family: free-rate or heterotachy (default: free-rate)
//!   --k-values=1,2,3       Candidate class counts (default: 1,2,3)
//!   --criterion=<name>     Selection criterion: AIC, AICc or BIC (default: BIC)
//!   --replicates=<N>       Simulated replicates (default: 100)
//!   --seed=<N>             Simulation seed (default: random)
//!   --threads=<N>          Threads per tool invocation (default: 1)
//!   --workers=<N>          Concurrent replicate refits (default: 1)
//!   --timeout-secs=<N>     Per-invocation timeout in seconds (default: 3600)
//!   --tree=<file>          Fix this tree for every fit
//!   --search               Full tree search instead of a BIONJ start tree
//!   --out-dir=<path>       Output directory (default: mixpower_out)

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::{thread_rng, Rng};
use serde::Serialize;

use mixpower::align;
use mixpower::fit::{self, FitConfig, FitTable};
use mixpower::invoke::{PowerError, ToolInstallation};
use mixpower::model::{Criterion, ModelFamily, TreeMode};
use mixpower::power::{self, AssessConfig, PowerResult};
use mixpower::simulate::{self, SimConfig};

/// Bumped when the shape of the persisted JSON changes.
const SCHEMA_VERSION: u32 = 1;

/// CLI configuration parsed from command-line arguments.
struct CliConfig {
    alignment: Option<PathBuf>,
    tool: Option<PathBuf>,
    base_model: String,
    family: ModelFamily,
    k_values: Vec<u32>,
    criterion: Criterion,
    replicates: usize,
    seed: Option<u64>,
    threads: u32,
    workers: usize,
    timeout_secs: u64,
    tree: Option<PathBuf>,
    search: bool,
    out_dir: PathBuf,
}

/// Everything one run produced, persisted as a single JSON document.
#[derive(Serialize)]
struct RunBundle {
    schema_version: u32,
    crate_version: &'static str,
    alignment: PathBuf,
    site_count: usize,
    base_model: String,
    family: ModelFamily,
    k_values: Vec<u32>,
    criterion: Criterion,
    replicates_requested: usize,
    seed: u64,
    workers: usize,
    empirical: FitTable,
    result: PowerResult,
}

fn parse_args() -> CliConfig {
    let args: Vec<String> = std::env::args().collect();

    let alignment = args
        .iter()
        .find(|a| a.starts_with("--alignment="))
        .map(|a| PathBuf::from(a.strip_prefix("--alignment=").unwrap()));

    let tool = args
        .iter()
        .find(|a| a.starts_with("--tool="))
        .map(|a| PathBuf::from(a.strip_prefix("--tool=").unwrap()));

    let base_model = args
        .iter()
        .find(|a| a.starts_with("--base-model="))
        .map(|a| a.strip_prefix("--base-model=").unwrap().to_string())
        .unwrap_or_else(|| "GTR+F".to_string());

    let family = args
        .iter()
        .find(|a| a.starts_with("--family="))
        .and_then(|a| a.strip_prefix("--family=")?.parse::<ModelFamily>().ok())
        .unwrap_or(ModelFamily::FreeRate);

    let k_values: Vec<u32> = args
        .iter()
        .find(|a| a.starts_with("--k-values="))
        .map(|a| {
            a.strip_prefix("--k-values=")
                .unwrap()
                .split(',')
                .filter_map(|s| s.trim().parse::<u32>().ok())
                .filter(|&k| k > 0)
                .collect()
        })
        .unwrap_or_else(|| vec![1, 2, 3]);

    let criterion = args
        .iter()
        .find(|a| a.starts_with("--criterion="))
        .and_then(|a| a.strip_prefix("--criterion=")?.parse::<Criterion>().ok())
        .unwrap_or(Criterion::Bic);

    let replicates = args
        .iter()
        .find(|a| a.starts_with("--replicates="))
        .and_then(|a| a.strip_prefix("--replicates=")?.parse::<usize>().ok())
        .unwrap_or(100);

    let seed = args
        .iter()
        .find(|a| a.starts_with("--seed="))
        .and_then(|a| a.strip_prefix("--seed=")?.parse::<u64>().ok());

    let threads = args
        .iter()
        .find(|a| a.starts_with("--threads="))
        .and_then(|a| a.strip_prefix("--threads=")?.parse::<u32>().ok())
        .unwrap_or(1);

    let workers = args
        .iter()
        .find(|a| a.starts_with("--workers="))
        .and_then(|a| a.strip_prefix("--workers=")?.parse::<usize>().ok())
        .unwrap_or(1);

    let timeout_secs = args
        .iter()
        .find(|a| a.starts_with("--timeout-secs="))
        .and_then(|a| a.strip_prefix("--timeout-secs=")?.parse::<u64>().ok())
        .unwrap_or(3600);

    let tree = args
        .iter()
        .find(|a| a.starts_with("--tree="))
        .map(|a| PathBuf::from(a.strip_prefix("--tree=").unwrap()));

    let search = args.iter().any(|a| a == "--search");

    let out_dir = args
        .iter()
        .find(|a| a.starts_with("--out-dir="))
        .map(|a| PathBuf::from(a.strip_prefix("--out-dir=").unwrap()))
        .unwrap_or_else(|| PathBuf::from("mixpower_out"));

    CliConfig {
        alignment,
        tool,
        base_model,
        family,
        k_values,
        criterion,
        replicates,
        seed,
        threads,
        workers,
        timeout_secs,
        tree,
        search,
        out_dir,
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return;
    }

    let config = parse_args();

    println!("========================================");
    println!("  mixpower: Mixture Model Power Analysis");
    println!("========================================");
    println!();

    let alignment = match config.alignment.clone() {
        Some(path) => path,
        None => {
            eprintln!("Error: --alignment=<file> is required");
            eprintln!();
            print_usage();
            std::process::exit(2);
        }
    };

    println!("Checking inference tool...");
    let tool = match ToolInstallation::resolve(config.tool.as_deref()) {
        Ok(tool) => {
            println!("  Tool found: {}", tool.executable.display());
            tool
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!();
            eprintln!("IQ-TREE is required. Get it from http://www.iqtree.org");
            eprintln!("or point at a binary with: --tool=/path/to/iqtree2");
            std::process::exit(1);
        }
    };
    println!();

    if let Err(e) = run(&tool, &config, &alignment) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    println!();
    println!("========================================");
    println!("  Done.");
    println!("========================================");
}

/// Fit, select, simulate, refit, aggregate.
fn run(tool: &ToolInstallation, config: &CliConfig, alignment: &Path) -> Result<(), PowerError> {
    let mut k_values = config.k_values.clone();
    k_values.sort_unstable();
    k_values.dedup();
    if k_values.is_empty() {
        return Err(PowerError::Parse("no candidate K values given".to_string()));
    }
    if config.replicates == 0 {
        return Err(PowerError::Parse(
            "at least one replicate is required".to_string(),
        ));
    }

    let tree_mode = match (&config.tree, config.search) {
        (Some(path), _) => TreeMode::FixedTree(path.clone()),
        (None, true) => TreeMode::Search,
        (None, false) => TreeMode::AutoNj,
    };
    let seed = config.seed.unwrap_or_else(|| thread_rng().gen::<u32>() as u64);
    let timeout = Duration::from_secs(config.timeout_secs);

    fs::create_dir_all(&config.out_dir)?;
    let site_count = align::count_sites(alignment)?;

    println!("--- Empirical Fits ---");
    println!("  Alignment: {} ({} sites)", alignment.display(), site_count);
    println!("  Family: {} over {}", config.family, config.base_model);
    println!("  Candidates: K = {:?}", k_values);
    println!("  Criterion: {}", config.criterion.label());
    println!("  Tree mode: {}", tree_mode);
    println!();

    let fit_cfg = FitConfig {
        base_model: config.base_model.clone(),
        family: config.family,
        tree_mode,
        threads: config.threads,
        timeout,
    };
    let empirical = fit::fit_all(
        tool,
        &fit_cfg,
        alignment,
        &k_values,
        &config.out_dir.join("empirical"),
        "",
    )?;
    save_json(&config.out_dir.join("empirical_fits.json"), &empirical);

    let best_k = power::select_best_k(&empirical, config.criterion);
    print_fit_table(&empirical, best_k);
    let best_k = match best_k {
        Some(k) => k,
        None => {
            return Err(PowerError::Parse(format!(
                "{} missing from at least one empirical report, cannot select a best K",
                config.criterion.label()
            )));
        }
    };
    println!();
    println!("  Best K by {}: {}", config.criterion.label(), best_k);

    let best = empirical
        .record_for(best_k)
        .cloned()
        .ok_or_else(|| PowerError::Parse(format!("no fit record for K={}", best_k)))?;

    println!();
    println!("--- Simulation ---");
    println!("  Replicates: {}", config.replicates);
    println!("  Seed: {}", seed);
    println!();

    let sim_cfg = SimConfig {
        alignment: alignment.to_path_buf(),
        site_count,
        replicates: config.replicates,
        seed,
        threads: config.threads,
        timeout,
    };
    let files = simulate::simulate(tool, &best, &sim_cfg, &config.out_dir.join("sims"))?;
    println!("  Simulated alignments: {}", files.len());

    println!();
    println!("--- Replicate Refits ---");
    println!("  Workers: {}", config.workers);
    println!();

    let assess_cfg = AssessConfig {
        k_values: k_values.clone(),
        best_k,
        criterion: config.criterion,
        workers: config.workers,
        work_dir: config.out_dir.join("sim_fits"),
    };
    let result = power::assess(tool, &fit_cfg, &assess_cfg, &files)?;

    let bundle = RunBundle {
        schema_version: SCHEMA_VERSION,
        crate_version: env!("CARGO_PKG_VERSION"),
        alignment: alignment.to_path_buf(),
        site_count,
        base_model: config.base_model.clone(),
        family: config.family,
        k_values,
        criterion: config.criterion,
        replicates_requested: config.replicates,
        seed,
        workers: config.workers,
        empirical,
        result: result.clone(),
    };
    let bundle_path = config.out_dir.join("power_result.json");
    save_json(&bundle_path, &bundle);

    print_power_summary(&result);
    println!();
    println!("  Results saved: {}", bundle_path.display());
    Ok(())
}

/// Print the per-K fit statistics, starring the selected K.
fn print_fit_table(table: &FitTable, best_k: Option<u32>) {
    println!("┌──────┬──────────────┬────────┬────────────┬────────────┬────────────┐");
    println!("│  K   │     logL     │ params │    AIC     │    AICc    │    BIC     │");
    println!("├──────┼──────────────┼────────┼────────────┼────────────┼────────────┤");
    for r in &table.records {
        let marker = if best_k == Some(r.k) { "*" } else { " " };
        println!(
            "│ {:>3}{} │ {:>12} │ {:>6} │ {:>10} │ {:>10} │ {:>10} │",
            r.k,
            marker,
            fmt_opt(r.log_likelihood, 2),
            fmt_opt(r.free_parameters, 0),
            fmt_opt(r.aic, 1),
            fmt_opt(r.aicc, 1),
            fmt_opt(r.bic, 1),
        );
    }
    println!("└──────┴──────────────┴────────┴────────────┴────────────┴────────────┘");
}

fn print_power_summary(result: &PowerResult) {
    println!();
    println!("╔══════════════════════════════════════════════════╗");
    println!("║                  Power Estimate                  ║");
    println!("╚══════════════════════════════════════════════════╝");
    println!();
    println!("  Criterion:  {}", result.criterion.label());
    println!("  Best K:     {}", result.best_k);
    println!("  Matches:    {}/{}", result.matches, result.usable);
    if result.excluded > 0 {
        println!("  Excluded:   {} replicates", result.excluded);
    }
    println!("  Power:      {:.3}", result.power);
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    match value {
        Some(v) => format!("{:.*}", precision, v),
        None => "-".to_string(),
    }
}

fn print_usage() {
    println!("mixpower: parametric-bootstrap power estimation for mixture-model selection");
    println!();
    println!("Usage:");
    println!("  mixpower --alignment=<file> [options]");
    println!();
    println!("Options:");
    println!("  --alignment=<file>     Empirical alignment (FASTA or PHYLIP), required");
    println!("  --tool=<path>          Inference tool binary (default: probe iqtree2, iqtree)");
    println!("  --base-model=<name>    Substitution model the mixture extends (default: GTR+F)");
    println!("  --family=<name>        Mixture family: free-rate or heterotachy (default: free-rate)");
    println!("  --k-values=1,2,3       Candidate class counts (default: 1,2,3)");
    println!("  --criterion=<name>     Selection criterion: AIC, AICc or BIC (default: BIC)");
    println!("  --replicates=<N>       Simulated replicates (default: 100)");
    println!("  --seed=<N>             Simulation seed (default: random)");
    println!("  --threads=<N>          Threads per tool invocation (default: 1)");
    println!("  --workers=<N>          Concurrent replicate refits (default: 1)");
    println!("  --timeout-secs=<N>     Per-invocation timeout in seconds (default: 3600)");
    println!("  --tree=<file>          Fix this tree for every fit");
    println!("  --search               Full tree search instead of a BIONJ start tree");
    println!("  --out-dir=<path>       Output directory (default: mixpower_out)");
}

/// Save a serializable value as JSON.
fn save_json<T: Serialize>(path: &Path, data: &T) {
    match serde_json::to_string_pretty(data) {
        Ok(json) => {
            if let Err(e) = std::fs::write(path, &json) {
                eprintln!("  Warning: failed to write {}: {}", path.display(), e);
            }
        }
        Err(e) => {
            eprintln!("  Warning: failed to serialize {}: {}", path.display(), e);
        }
    }
}

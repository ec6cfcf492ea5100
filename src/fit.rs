//! Single-model fits and per-K batch fitting.
//!
//! One fit = one subprocess invocation of the inference tool plus one
//! report parse. Every on-disk artifact of a fit (report, tree,
//! checkpoint, log) lives under its output prefix, so concurrent fits
//! only need distinct prefixes to stay isolated.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::invoke::{PowerError, ToolInstallation};
use crate::model::{Criterion, ModelFamily, TreeMode};
use crate::report;

/// Everything a fit needs besides the alignment and K.
#[derive(Debug, Clone)]
pub struct FitConfig {
    /// Base substitution model, e.g. `GTR+F`.
    pub base_model: String,
    /// Mixture family stacked onto the base model for K > 1.
    pub family: ModelFamily,
    /// Tree-topology handling, shared by every fit of a run.
    pub tree_mode: TreeMode,
    /// Threads handed to the tool per invocation (`-T`).
    pub threads: u32,
    /// Wall-clock budget per invocation.
    pub timeout: Duration,
}

/// Outcome of fitting one model complexity to one alignment.
///
/// Immutable once returned; the statistics are `None` wherever the report
/// lacked the matching label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitRecord {
    /// Number of mixture categories.
    pub k: u32,
    /// Full model descriptor passed to the tool (`-m`).
    pub model: String,
    /// Tree-topology handling used for this fit.
    pub tree_mode: TreeMode,
    /// Output prefix; every artifact of this fit lives under it.
    pub prefix: PathBuf,
    /// Report file the statistics were parsed from.
    pub report_path: PathBuf,
    /// Maximum-likelihood tree written by the tool.
    pub tree_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_likelihood: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub free_parameters: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aic: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aicc: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bic: Option<f64>,
}

impl FitRecord {
    /// Value of the chosen criterion, if the report carried it.
    pub fn criterion(&self, criterion: Criterion) -> Option<f64> {
        match criterion {
            Criterion::Aic => self.aic,
            Criterion::Aicc => self.aicc,
            Criterion::Bic => self.bic,
        }
    }
}

/// Per-K fit results for one alignment, in requested-K order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitTable {
    pub records: Vec<FitRecord>,
}

impl FitTable {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// K values in table order.
    pub fn k_values(&self) -> Vec<u32> {
        self.records.iter().map(|r| r.k).collect()
    }

    pub fn record_for(&self, k: u32) -> Option<&FitRecord> {
        self.records.iter().find(|r| r.k == k)
    }
}

/// Fit one model complexity `k` to `alignment`, leaving all artifacts
/// under `prefix`.
///
/// Tool failures and timeouts propagate unchanged; retrying a failed fit
/// is the caller's decision. A report that parses but lacks some
/// statistics still yields a record; downstream selection decides what to
/// do with the gaps.
pub fn fit(
    tool: &ToolInstallation,
    cfg: &FitConfig,
    alignment: &Path,
    k: u32,
    prefix: &Path,
) -> Result<FitRecord, PowerError> {
    let model = cfg.family.descriptor(&cfg.base_model, k);
    let args = fit_args(cfg, alignment, &model, prefix);

    log::info!("fitting {} (K={}) to {}", model, k, alignment.display());
    tool.invoke(&args, cfg.timeout)?;

    let report_path = PathBuf::from(format!("{}.iqtree", prefix.display()));
    let tree_path = PathBuf::from(format!("{}.treefile", prefix.display()));
    let stats = report::parse_fit_report(&report_path)?;
    log::debug!("{}: {:?}", report_path.display(), stats);

    Ok(FitRecord {
        k,
        model,
        tree_mode: cfg.tree_mode.clone(),
        prefix: prefix.to_path_buf(),
        report_path,
        tree_path,
        log_likelihood: stats.log_likelihood,
        free_parameters: stats.free_parameters,
        aic: stats.aic,
        aicc: stats.aicc,
        bic: stats.bic,
    })
}

/// Fit every K in `k_values` to one alignment, serially, labelling each
/// fit `{label_prefix}K{k}` under `out_dir`.
pub fn fit_all(
    tool: &ToolInstallation,
    cfg: &FitConfig,
    alignment: &Path,
    k_values: &[u32],
    out_dir: &Path,
    label_prefix: &str,
) -> Result<FitTable, PowerError> {
    fs::create_dir_all(out_dir)?;
    let mut table = FitTable::default();
    for &k in k_values {
        let prefix = out_dir.join(format!("{}K{}", label_prefix, k));
        let record = fit(tool, cfg, alignment, k, &prefix)?;
        table.records.push(record);
    }
    Ok(table)
}

/// Argument list for one fit invocation.
fn fit_args(cfg: &FitConfig, alignment: &Path, model: &str, prefix: &Path) -> Vec<String> {
    let mut args = vec![
        "-s".to_string(),
        alignment.display().to_string(),
        "-m".to_string(),
        model.to_string(),
        "--prefix".to_string(),
        prefix.display().to_string(),
        "-T".to_string(),
        cfg.threads.to_string(),
        "--redo".to_string(),
    ];
    args.extend(cfg.tree_mode.args());
    args
}

//! Criterion-based selection and power aggregation.
//!
//! A replicate counts toward the power estimate only when every candidate
//! K carries the selection criterion, so replicates are comparable on the
//! same footing. Replicates whose refits fail, or whose reports lack the
//! criterion for some K, are excluded from the denominator with a warning
//! rather than aborting the whole run.

use std::fs;
use std::path::PathBuf;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::fit::{self, FitConfig, FitRecord, FitTable};
use crate::invoke::{PowerError, ToolInstallation};
use crate::model::Criterion;

/// Refits of every candidate K against one simulated replicate.
#[derive(Debug, Clone)]
pub struct ReplicateOutcome {
    pub replicate: String,
    pub table: FitTable,
}

/// One refit in the flattened per-replicate table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimRow {
    pub replicate: String,
    pub fit: FitRecord,
}

/// Outcome of a power assessment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerResult {
    pub criterion: Criterion,
    /// K the empirical data selected; replicates are scored against it.
    pub best_k: u32,
    /// Replicates whose refits selected `best_k`.
    pub matches: usize,
    /// Replicates where selection was possible at all.
    pub usable: usize,
    /// Replicates dropped from the denominator.
    pub excluded: usize,
    /// `matches / usable`.
    pub power: f64,
    pub simulation_table: Vec<SimRow>,
}

/// Inputs of the replicate-refit stage.
#[derive(Debug, Clone)]
pub struct AssessConfig {
    pub k_values: Vec<u32>,
    pub best_k: u32,
    pub criterion: Criterion,
    /// Replicates refitted concurrently. 1 keeps everything on the
    /// calling thread.
    pub workers: usize,
    /// Directory receiving the per-replicate fit outputs.
    pub work_dir: PathBuf,
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// K with the lowest criterion value, ties going to the smaller K.
///
/// `None` when the table is empty or any record lacks the criterion;
/// a partial table cannot be compared fairly.
pub fn select_best_k(table: &FitTable, criterion: Criterion) -> Option<u32> {
    let mut best: Option<(u32, f64)> = None;
    for record in &table.records {
        let value = record.criterion(criterion)?;
        let better = match best {
            Some((best_k, best_value)) => {
                value < best_value || (value == best_value && record.k < best_k)
            }
            None => true,
        };
        if better {
            best = Some((record.k, value));
        }
    }
    best.map(|(k, _)| k)
}

// ---------------------------------------------------------------------------
// Aggregation
// ---------------------------------------------------------------------------

/// Score each outcome against `best_k` and fold into a [`PowerResult`].
///
/// `attempted` is the number of replicates the caller tried to refit;
/// the difference against the usable count becomes the excluded tally,
/// covering both outcomes dropped before this point and outcomes whose
/// criterion is incomplete. Every refit row lands in the table either
/// way, so excluded replicates stay inspectable.
pub fn summarize(
    outcomes: Vec<ReplicateOutcome>,
    attempted: usize,
    best_k: u32,
    criterion: Criterion,
) -> Result<PowerResult, PowerError> {
    let mut matches = 0usize;
    let mut usable = 0usize;
    let mut simulation_table = Vec::new();

    for ReplicateOutcome { replicate, table } in outcomes {
        match select_best_k(&table, criterion) {
            Some(selected) => {
                usable += 1;
                if selected == best_k {
                    matches += 1;
                }
            }
            None => {
                log::warn!(
                    "replicate {}: {} not comparable across all K, excluding",
                    replicate,
                    criterion.label()
                );
            }
        }
        for fit in table.records {
            simulation_table.push(SimRow {
                replicate: replicate.clone(),
                fit,
            });
        }
    }

    if usable == 0 {
        return Err(PowerError::NoUsableReplicates);
    }

    Ok(PowerResult {
        criterion,
        best_k,
        matches,
        usable,
        excluded: attempted - usable,
        power: matches as f64 / usable as f64,
        simulation_table,
    })
}

/// Label for replicate `index` (1-based), zero-padded so per-replicate
/// file prefixes sort in replicate order.
fn replicate_label(index: usize, width: usize) -> String {
    format!("sim{:0width$}_", index, width = width)
}

/// Refit every candidate K against every replicate and estimate power.
///
/// With `workers > 1` replicates run on a bounded worker pool; results
/// are collected in submission order, so the outcome is deterministic
/// either way. A replicate whose refits fail is logged and excluded, not
/// fatal.
pub fn assess(
    tool: &ToolInstallation,
    fit_cfg: &FitConfig,
    cfg: &AssessConfig,
    replicate_files: &[PathBuf],
) -> Result<PowerResult, PowerError> {
    fs::create_dir_all(&cfg.work_dir)?;
    let attempted = replicate_files.len();
    let width = attempted.to_string().len();

    let run_one = |index: usize, file: &PathBuf| -> Option<ReplicateOutcome> {
        let label = replicate_label(index + 1, width);
        match fit::fit_all(tool, fit_cfg, file, &cfg.k_values, &cfg.work_dir, &label) {
            Ok(table) => Some(ReplicateOutcome {
                replicate: label,
                table,
            }),
            Err(err) => {
                log::warn!("replicate {} failed, excluding: {}", file.display(), err);
                None
            }
        }
    };

    let outcomes: Vec<ReplicateOutcome> = if cfg.workers > 1 {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(cfg.workers)
            .build()
            .map_err(|e| PowerError::WorkerPool(e.to_string()))?;
        pool.install(|| {
            replicate_files
                .par_iter()
                .enumerate()
                .map(|(i, f)| run_one(i, f))
                .collect::<Vec<_>>()
        })
        .into_iter()
        .flatten()
        .collect()
    } else {
        replicate_files
            .iter()
            .enumerate()
            .filter_map(|(i, f)| run_one(i, f))
            .collect()
    };

    summarize(outcomes, attempted, cfg.best_k, cfg.criterion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TreeMode;

    fn rec(k: u32, bic: Option<f64>) -> FitRecord {
        FitRecord {
            k,
            model: format!("GTR+F+R{}", k),
            tree_mode: TreeMode::AutoNj,
            prefix: PathBuf::from(format!("K{}", k)),
            report_path: PathBuf::from(format!("K{}.iqtree", k)),
            tree_path: PathBuf::from(format!("K{}.treefile", k)),
            log_likelihood: Some(-500.0),
            free_parameters: Some(10.0),
            aic: bic.map(|b| b - 40.0),
            aicc: bic.map(|b| b - 39.0),
            bic,
        }
    }

    fn table_of(records: Vec<FitRecord>) -> FitTable {
        FitTable { records }
    }

    fn outcome(label: &str, records: Vec<FitRecord>) -> ReplicateOutcome {
        ReplicateOutcome {
            replicate: label.to_string(),
            table: table_of(records),
        }
    }

    #[test]
    fn test_select_lowest_criterion_value_wins() {
        let table = table_of(vec![
            rec(1, Some(1200.0)),
            rec(2, Some(1100.0)),
            rec(3, Some(1150.0)),
        ]);
        assert_eq!(select_best_k(&table, Criterion::Bic), Some(2));
    }

    #[test]
    fn test_select_tie_goes_to_smaller_k() {
        let table = table_of(vec![
            rec(1, Some(1100.0)),
            rec(2, Some(1100.0)),
            rec(3, Some(1200.0)),
        ]);
        assert_eq!(select_best_k(&table, Criterion::Bic), Some(1));

        // order in the table must not matter
        let table = table_of(vec![rec(3, Some(1100.0)), rec(1, Some(1100.0))]);
        assert_eq!(select_best_k(&table, Criterion::Bic), Some(1));
    }

    #[test]
    fn test_select_fails_when_any_value_missing() {
        let table = table_of(vec![rec(1, Some(1200.0)), rec(2, None)]);
        assert_eq!(select_best_k(&table, Criterion::Bic), None);
    }

    #[test]
    fn test_select_empty_table_is_none() {
        assert_eq!(select_best_k(&FitTable::default(), Criterion::Bic), None);
    }

    #[test]
    fn test_select_respects_requested_criterion() {
        // AIC ranks K3 first, BIC ranks K2 first
        let mut a = rec(2, Some(1100.0));
        a.aic = Some(1090.0);
        let mut b = rec(3, Some(1150.0));
        b.aic = Some(1050.0);
        let table = table_of(vec![a, b]);
        assert_eq!(select_best_k(&table, Criterion::Bic), Some(2));
        assert_eq!(select_best_k(&table, Criterion::Aic), Some(3));
    }

    #[test]
    fn test_summarize_all_replicates_match() {
        let recs = || vec![rec(1, Some(1200.0)), rec(2, Some(1100.0)), rec(3, Some(1150.0))];
        let outcomes = vec![
            outcome("sim1_", recs()),
            outcome("sim2_", recs()),
            outcome("sim3_", recs()),
        ];
        let result = summarize(outcomes, 3, 2, Criterion::Bic).unwrap();
        assert_eq!(result.matches, 3);
        assert_eq!(result.usable, 3);
        assert_eq!(result.excluded, 0);
        assert_eq!(result.power, 1.0);
        assert_eq!(result.simulation_table.len(), 9);
    }

    #[test]
    fn test_summarize_partial_match_rate() {
        let pick2 = vec![rec(1, Some(1200.0)), rec(2, Some(1100.0))];
        let pick1 = vec![rec(1, Some(1000.0)), rec(2, Some(1100.0))];
        let outcomes = vec![
            outcome("sim1_", pick2.clone()),
            outcome("sim2_", pick2),
            outcome("sim3_", pick1),
        ];
        let result = summarize(outcomes, 3, 2, Criterion::Bic).unwrap();
        assert_eq!(result.matches, 2);
        assert_eq!(result.usable, 3);
        assert!((result.power - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_summarize_no_replicate_matches() {
        let pick1 = || vec![rec(1, Some(1000.0)), rec(2, Some(1100.0))];
        let outcomes = vec![outcome("sim1_", pick1()), outcome("sim2_", pick1())];
        let result = summarize(outcomes, 2, 2, Criterion::Bic).unwrap();
        assert_eq!(result.matches, 0);
        assert_eq!(result.usable, 2);
        assert_eq!(result.power, 0.0);
    }

    #[test]
    fn test_summarize_excludes_incomparable_replicate() {
        let complete = vec![rec(1, Some(1200.0)), rec(2, Some(1100.0))];
        let gappy = vec![rec(1, Some(1200.0)), rec(2, None)];
        let outcomes = vec![outcome("sim1_", complete), outcome("sim2_", gappy)];
        let result = summarize(outcomes, 2, 2, Criterion::Bic).unwrap();
        assert_eq!(result.usable, 1);
        assert_eq!(result.excluded, 1);
        assert_eq!(result.power, 1.0);
        // excluded replicate's rows are still recorded
        assert_eq!(result.simulation_table.len(), 4);
    }

    #[test]
    fn test_summarize_counts_vanished_replicates_as_excluded() {
        // five attempted, only three produced outcomes at all
        let recs = vec![rec(1, Some(1200.0)), rec(2, Some(1100.0))];
        let outcomes = vec![
            outcome("sim1_", recs.clone()),
            outcome("sim3_", recs.clone()),
            outcome("sim5_", recs),
        ];
        let result = summarize(outcomes, 5, 2, Criterion::Bic).unwrap();
        assert_eq!(result.usable, 3);
        assert_eq!(result.excluded, 2);
    }

    #[test]
    fn test_summarize_no_usable_replicates_is_error() {
        let gappy = vec![rec(1, None), rec(2, Some(1100.0))];
        let outcomes = vec![outcome("sim1_", gappy)];
        match summarize(outcomes, 1, 2, Criterion::Bic) {
            Err(PowerError::NoUsableReplicates) => {}
            other => panic!("expected NoUsableReplicates, got {:?}", other),
        }
    }

    #[test]
    fn test_replicate_label_padding() {
        assert_eq!(replicate_label(1, 3), "sim001_");
        assert_eq!(replicate_label(42, 3), "sim042_");
        assert_eq!(replicate_label(7, 1), "sim7_");
    }

    // ------------------------------------------------------------------
    // End-to-end against a fake tool binary
    // ------------------------------------------------------------------

    #[cfg(unix)]
    mod end_to_end {
        use super::*;
        use crate::model::ModelFamily;
        use crate::simulate::{self, SimConfig};
        use std::fs;
        use std::path::Path;
        use std::time::Duration;
        use tempfile::TempDir;

        // Fits report a BIC ranking where K=2 always wins; simulation
        // requests write the asked-for number of replicate alignments.
        const FAKE_TOOL: &str = r#"#!/bin/sh
if [ "$1" = "--version" ]; then exit 0; fi
prefix=""
model=""
alisim=""
num=1
aln=""
prev=""
for a in "$@"; do
  case "$prev" in
    --prefix) prefix="$a" ;;
    -m) model="$a" ;;
    --alisim) alisim="$a" ;;
    --num-alignments) num="$a" ;;
    -s) aln="$a" ;;
  esac
  prev="$a"
done
if [ -n "$alisim" ]; then
  i=1
  while [ "$i" -le "$num" ]; do
    printf '>t1\nACGTACGTAC\n>t2\nACGAACGTAC\n' > "${alisim}_${i}.fa"
    i=$((i+1))
  done
  exit 0
fi
case "$model" in
  *R2*) bic=1000.5 ;;
  *R3*) bic=1500.5 ;;
  *) bic=2000.5 ;;
esac
cat > "${prefix}.iqtree" <<EOF
Log-likelihood of the tree: -480.25 (s.e. 12.0)
Number of free parameters (#branches + #model parameters): 12
Akaike information criterion (AIC) score: 984.50
Corrected Akaike information criterion (AICc) score: 985.75
Bayesian information criterion (BIC) score: ${bic}

ALISIM COMMAND
--------------
To simulate an alignment of the same length:

--alisim simulated_MSA -t ${prefix}.treefile -m "GTR+F" --length 10

To mimic the alignment:

${0} -s ${aln} --alisim mimicked_MSA -t ${prefix}.treefile -m "GTR+F"
EOF
printf '(t1:0.1,t2:0.1);\n' > "${prefix}.treefile"
exit 0
"#;

        // Same tool, but any fit against the second replicate fails.
        const FLAKY_GUARD: &str = r#"case "$*" in *rep_2.fa*) exit 9 ;; esac
"#;

        fn write_tool(dir: &Path, flaky: bool) -> ToolInstallation {
            use std::os::unix::fs::PermissionsExt;
            let script = if flaky {
                FAKE_TOOL.replacen(
                    "if [ \"$1\" = \"--version\" ]; then exit 0; fi\n",
                    &format!(
                        "if [ \"$1\" = \"--version\" ]; then exit 0; fi\n{}",
                        FLAKY_GUARD
                    ),
                    1,
                )
            } else {
                FAKE_TOOL.to_string()
            };
            let path = dir.join("faketool.sh");
            fs::write(&path, script).unwrap();
            let mut perms = fs::metadata(&path).unwrap().permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&path, perms).unwrap();
            ToolInstallation { executable: path }
        }

        fn fit_config() -> FitConfig {
            FitConfig {
                base_model: "GTR+F".to_string(),
                family: ModelFamily::FreeRate,
                tree_mode: TreeMode::AutoNj,
                threads: 1,
                timeout: Duration::from_secs(60),
            }
        }

        #[test]
        fn test_full_pipeline_against_fake_tool() {
            let dir = TempDir::new().unwrap();
            let alignment = dir.path().join("data.fasta");
            fs::write(&alignment, ">t1\nACGTACGTAC\n>t2\nACGAACGTAC\n").unwrap();
            let tool = write_tool(dir.path(), false);
            let fit_cfg = fit_config();
            let k_values = vec![1, 2, 3];

            let empirical = fit::fit_all(
                &tool,
                &fit_cfg,
                &alignment,
                &k_values,
                &dir.path().join("empirical"),
                "",
            )
            .unwrap();
            assert_eq!(empirical.len(), 3);
            let best_k = select_best_k(&empirical, Criterion::Bic).unwrap();
            assert_eq!(best_k, 2);

            // refitting over the same prefixes is idempotent
            let refit = fit::fit_all(
                &tool,
                &fit_cfg,
                &alignment,
                &k_values,
                &dir.path().join("empirical"),
                "",
            )
            .unwrap();
            assert_eq!(refit.k_values(), empirical.k_values());
            assert_eq!(refit.len(), empirical.len());

            let best = empirical.record_for(best_k).unwrap();
            let sim_cfg = SimConfig {
                alignment: alignment.clone(),
                site_count: 10,
                replicates: 3,
                seed: 7,
                threads: 1,
                timeout: Duration::from_secs(60),
            };
            let files = simulate::simulate(&tool, best, &sim_cfg, &dir.path().join("sims")).unwrap();
            assert_eq!(files.len(), 3);

            let cfg = AssessConfig {
                k_values,
                best_k,
                criterion: Criterion::Bic,
                workers: 2,
                work_dir: dir.path().join("sim_fits"),
            };
            let result = assess(&tool, &fit_cfg, &cfg, &files).unwrap();
            assert_eq!(result.best_k, 2);
            assert_eq!(result.usable, 3);
            assert_eq!(result.matches, 3);
            assert_eq!(result.excluded, 0);
            assert_eq!(result.power, 1.0);
            assert_eq!(result.simulation_table.len(), 9, "three K per replicate");

            // deterministic: a second pass refits into the same prefixes
            let again = assess(&tool, &fit_cfg, &cfg, &files).unwrap();
            assert_eq!(again, result);
        }

        #[test]
        fn test_assess_excludes_failing_replicate() {
            let dir = TempDir::new().unwrap();
            let tool = write_tool(dir.path(), true);
            let fit_cfg = fit_config();

            let sims = dir.path().join("sims");
            fs::create_dir_all(&sims).unwrap();
            let mut files = Vec::new();
            for i in 1..=3 {
                let f = sims.join(format!("rep_{}.fa", i));
                fs::write(&f, ">t1\nACGTACGTAC\n>t2\nACGAACGTAC\n").unwrap();
                files.push(f);
            }

            let cfg = AssessConfig {
                k_values: vec![1, 2, 3],
                best_k: 2,
                criterion: Criterion::Bic,
                workers: 1,
                work_dir: dir.path().join("sim_fits"),
            };
            let result = assess(&tool, &fit_cfg, &cfg, &files).unwrap();
            assert_eq!(result.usable, 2);
            assert_eq!(result.excluded, 1);
            assert_eq!(result.matches, 2);
            assert_eq!(result.power, 1.0);
            assert_eq!(result.simulation_table.len(), 6, "failed replicate has no rows");
        }
    }
}

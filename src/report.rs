//! Parsing of inference-tool text reports.
//!
//! Reports are line-oriented text with fixed English labels in front of
//! numeric fields:
//!
//! ```text
//! Log-likelihood of the tree: -4581.3782 (s.e. 112.5465)
//! Number of free parameters (#branches + #model parameters): 25
//! Akaike information criterion (AIC) score: 9213.7564
//! Corrected Akaike information criterion (AICc) score: 9215.1022
//! Bayesian information criterion (BIC) score: 9336.4582
//! ```
//!
//! Any label can be absent (interrupted runs, format drift across tool
//! versions); a missing field parses to `None`, never an error. A report
//! may also carry a simulation section headed `ALISIM COMMAND` with one or
//! more ready-to-run command lines for regenerating data under the fitted
//! model; extracting those is equally tolerant of absence.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::invoke::PowerError;

// Report labels, matched against the first line containing them.
const LL_LABEL: &str = "Log-likelihood of the tree:";
const FREE_PARAMS_LABEL: &str = "Number of free parameters";
const AIC_LABEL: &str = "Akaike information criterion (AIC) score:";
const AICC_LABEL: &str = "Corrected Akaike information criterion (AICc) score:";
const BIC_LABEL: &str = "Bayesian information criterion (BIC) score:";

/// Marker heading the replay-command section of a report.
pub const REPLAY_SECTION_MARKER: &str = "ALISIM COMMAND";

/// A line in the replay section is a command if it carries this flag.
const SIM_COMMAND_FLAG: &str = "--alisim";

/// Keyword distinguishing the gap-copying replay variant.
const MIMIC_KEYWORD: &str = "mimic";

/// Numeric fit statistics extracted from one report. Every field may be
/// absent in a damaged or foreign report.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FitStats {
    pub log_likelihood: Option<f64>,
    pub free_parameters: Option<f64>,
    pub aic: Option<f64>,
    pub aicc: Option<f64>,
    pub bic: Option<f64>,
}

/// Which replay-command variant to extract from a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayVariant {
    /// Command that also copies the empirical gap pattern into the
    /// simulated alignments (carries the `mimic` keyword).
    MimicGaps,
    /// Plain simulation command, without gap copying.
    Plain,
}

/// Parse the numeric fit statistics from a report file.
pub fn parse_fit_report(path: &Path) -> Result<FitStats, PowerError> {
    let text = fs::read_to_string(path)?;
    Ok(parse_fit_text(&text))
}

/// Parse fit statistics out of report text. Missing labels yield `None`.
pub fn parse_fit_text(text: &str) -> FitStats {
    FitStats {
        log_likelihood: field_after(text, LL_LABEL),
        free_parameters: field_after(text, FREE_PARAMS_LABEL),
        aic: field_after(text, AIC_LABEL),
        aicc: field_after(text, AICC_LABEL),
        bic: field_after(text, BIC_LABEL),
    }
}

/// Extract a replay command line from a report file, if present.
///
/// Absence is not an error: callers fall back to building the simulation
/// command from the fit record instead.
pub fn parse_replay_command(
    path: &Path,
    variant: ReplayVariant,
) -> Result<Option<String>, PowerError> {
    let text = fs::read_to_string(path)?;
    Ok(replay_from_text(&text, variant))
}

/// Like [`parse_replay_command`], on already-loaded report text.
///
/// Scans past the section marker, then returns the first non-blank line
/// carrying the simulation flag that matches the requested variant.
pub fn replay_from_text(text: &str, variant: ReplayVariant) -> Option<String> {
    let mut in_section = false;
    for line in text.lines() {
        if !in_section {
            in_section = line.contains(REPLAY_SECTION_MARKER);
            continue;
        }
        let trimmed = line.trim();
        if trimmed.is_empty() || !trimmed.contains(SIM_COMMAND_FLAG) {
            continue;
        }
        let is_mimic = trimmed.contains(MIMIC_KEYWORD);
        let wanted = match variant {
            ReplayVariant::MimicGaps => is_mimic,
            ReplayVariant::Plain => !is_mimic,
        };
        if wanted {
            return Some(trimmed.to_string());
        }
    }
    None
}

/// First numeric token after the first occurrence of `label`.
fn field_after(text: &str, label: &str) -> Option<f64> {
    let line = text.lines().find(|l| l.contains(label))?;
    let idx = line.find(label)?;
    first_number(&line[idx + label.len()..])
}

/// First whitespace-separated token that parses as a float. Handles
/// negatives and scientific notation; skips annotations like `(s.e.`.
fn first_number(s: &str) -> Option<f64> {
    s.split_whitespace().find_map(|tok| tok.parse::<f64>().ok())
}

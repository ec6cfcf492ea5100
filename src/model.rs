//! Model vocabulary: mixture families, tree-handling modes, and selection
//! criteria.
//!
//! Families own their descriptor syntax so new ones slot in as variants
//! rather than string concatenation scattered across the pipeline.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Mixture-model family, i.e. what a category varies over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelFamily {
    /// Free-rate site-heterogeneity categories (`+R`).
    FreeRate,
    /// Heterotachy (GHOST) branch-length classes (`+H`).
    Heterotachy,
}

impl ModelFamily {
    pub fn suffix(self) -> &'static str {
        match self {
            ModelFamily::FreeRate => "+R",
            ModelFamily::Heterotachy => "+H",
        }
    }

    /// Full model descriptor for `k` categories on top of `base`.
    ///
    /// A single category drops the suffix entirely: `GTR+R1` is not a
    /// model the tool accepts, the plain base model is.
    pub fn descriptor(self, base: &str, k: u32) -> String {
        if k <= 1 {
            base.to_string()
        } else {
            format!("{}{}{}", base, self.suffix(), k)
        }
    }
}

impl fmt::Display for ModelFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelFamily::FreeRate => write!(f, "free-rate"),
            ModelFamily::Heterotachy => write!(f, "heterotachy"),
        }
    }
}

impl FromStr for ModelFamily {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free-rate" | "freerate" | "r" | "+r" => Ok(ModelFamily::FreeRate),
            "heterotachy" | "ghost" | "h" | "+h" => Ok(ModelFamily::Heterotachy),
            other => Err(format!(
                "unknown model family '{}' (expected free-rate or heterotachy)",
                other
            )),
        }
    }
}

/// How tree topology is handled during a fit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TreeMode {
    /// Compute a fast distance-based (BIONJ) tree and fix it before
    /// likelihood optimization. Fastest; each fit gets its own topology.
    AutoNj,
    /// Fix a caller-supplied tree, sharing one topology across all fits.
    FixedTree(PathBuf),
    /// Full heuristic topology search. Slowest; no fixed-tree flag.
    Search,
}

impl TreeMode {
    /// Tool arguments selecting this mode.
    pub fn args(&self) -> Vec<String> {
        match self {
            TreeMode::AutoNj => vec!["-te".to_string(), "BIONJ".to_string()],
            TreeMode::FixedTree(path) => {
                vec!["-te".to_string(), path.display().to_string()]
            }
            TreeMode::Search => Vec::new(),
        }
    }
}

impl fmt::Display for TreeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TreeMode::AutoNj => write!(f, "auto-nj"),
            TreeMode::FixedTree(path) => write!(f, "fixed tree {}", path.display()),
            TreeMode::Search => write!(f, "search"),
        }
    }
}

/// Information criterion used to rank fits. Lower is better for all three.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Criterion {
    Aic,
    Aicc,
    Bic,
}

impl Criterion {
    pub fn label(self) -> &'static str {
        match self {
            Criterion::Aic => "AIC",
            Criterion::Aicc => "AICc",
            Criterion::Bic => "BIC",
        }
    }
}

impl fmt::Display for Criterion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

impl FromStr for Criterion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "aic" => Ok(Criterion::Aic),
            "aicc" => Ok(Criterion::Aicc),
            "bic" => Ok(Criterion::Bic),
            other => Err(format!(
                "unknown criterion '{}' (expected aic, aicc, or bic)",
                other
            )),
        }
    }
}

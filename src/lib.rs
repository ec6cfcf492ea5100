//! mixpower: parametric-bootstrap power analysis for phylogenetic
//! mixture-model selection.
//!
//! Wraps an IQ-TREE-compatible inference tool as a subprocess backend to
//! answer one question: does this alignment carry enough signal to tell
//! K mixture categories apart? Each run:
//! 1. Fits a ladder of mixture models (K = 1, 2, ...) to the alignment
//! 2. Picks the best K under an information criterion (AIC/AICc/BIC)
//! 3. Simulates bootstrap replicates under the best-fitting model,
//!    replaying the tool's own emitted simulation command where possible
//! 4. Refits the whole ladder to every replicate, optionally on parallel
//!    workers
//! 5. Reports power: the fraction of replicates recovering the best K

pub mod align;
pub mod command;
pub mod fit;
pub mod invoke;
pub mod model;
pub mod power;
pub mod report;
pub mod simulate;

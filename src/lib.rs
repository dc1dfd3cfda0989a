//! # Haplofill Library Root
//!
//! ## Role
//! The crate root that declares all public modules and re-exports common types.
//!
//! ## Module Structure
//! ```text
//! haplofill
//! ├── data        # In-memory representations (sites, bit-plane genotypes, aligned donors)
//! ├── io          # Plain-text matrix and report formats
//! ├── model       # Algorithms (block distances, hypothesis ranking, phase HMM)
//! ├── pipelines   # High-level orchestration (per-taxon cascade, parallel driver)
//! └── utils       # Helpers (threading, run statistics)
//! ```

pub mod config;
pub mod data;
pub mod error;
pub mod io;
pub mod model;
pub mod pipelines;
pub mod utils;

pub use config::Config;
pub use error::{HaplofillError, Result};

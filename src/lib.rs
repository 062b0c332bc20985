pub mod artifact;
pub mod atmos;
pub mod codec;
pub mod config;
pub mod data;
pub mod diagnostics;
pub mod eps;
pub mod error;
pub mod export;
pub mod latlev;
pub mod model;
pub mod plotting;
pub mod scaling;
pub mod stats;
pub mod synthetic;

pub use error::{DiagnosticsError, Result};

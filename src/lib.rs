//! Surrogate safety analysis over recorded vehicle trajectories.
//!
//! Consumes time-stepped trajectory recordings from microscopic traffic
//! simulation, detects vehicle pairs on a collision course within a
//! time-to-collision threshold, and derives the surrogate safety measures
//! (TTC, PET, deceleration rates, delta-V and the Monte-Carlo
//! probabilistic variants) for every confirmed conflict.

pub mod config;
pub mod conflict;
pub mod engine;
pub mod error;
pub mod event;
pub mod geometry;
pub mod grid;
pub mod prediction;
pub mod summary;
pub mod trj;
pub mod vehicle;

pub use config::AnalysisConfig;
pub use conflict::{Conflict, ConflictType, Measure};
pub use engine::ConflictEngine;
pub use error::{AnalysisError, Result};
pub use summary::SafetySummary;
pub use trj::{TrjReader, TrjRecord};

//! Maintenance commands run outside the serving path

pub mod reaper;

pub use reaper::{reaper_for, DropReport, Reaper, ReplicaCount};

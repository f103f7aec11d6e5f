//! Render job distribution engine.
//!
//! Frames of a Blender scene are farmed out to price-competing providers on
//! a compute marketplace. The [`supervisor`] runs inside an isolated worker
//! process and streams progress to the host through [`host::JobHandle`].

pub mod artifact;
pub mod cli;
pub mod config;
pub mod error;
pub mod host;
pub mod logging;
pub mod market;
pub mod monitor;
pub mod pipeline;
pub mod policy;
pub mod progress;
pub mod queue;
pub mod requirement;
pub mod supervisor;
pub mod ui;

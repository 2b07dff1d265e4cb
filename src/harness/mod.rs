//! # Load Harness
//!
//! `run_stress` drives one batch: N concurrent client calls against a
//! running server, aggregated into a `StressResult`. `StressRunner` sweeps a
//! matrix of batches (operation × file size × client count × server pool
//! label), prints a summary after each and exports the rows as CSV.
//!
//! The harness never starts or reconfigures the server. The server pool
//! size in a job is a label recorded in the report; it is up to whoever runs
//! the sweep to start the server with that pool size.

pub mod matrix;
pub mod stress;

pub use matrix::{StressRunner, TestMatrix};
pub use stress::{run_stress, StressJob, StressResult};

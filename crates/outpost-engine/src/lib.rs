//! Outpost Engine - capability registry and dispatch pipeline
//!
//! A [`Registry`] maps capability names to constructors. A [`Dispatcher`]
//! runs a job's capability, drains what it emits and re-enters itself for
//! every job found on the stream, folding the nested results into the
//! caller's [`Outcome`].

pub mod dispatcher;
pub mod registry;

pub use dispatcher::{Dispatcher, Outcome};
pub use registry::{default_registry, Registry};

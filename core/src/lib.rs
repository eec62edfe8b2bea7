//! Starflow: durable workflows written in a small Python-like scripting
//! language, run on a replaying workflow engine.
//!
//! - [`workflow`] and [`worker`] define the engine-neutral capabilities.
//! - [`backend`] adapts them to the built-in [`engine`].
//! - [`service`] and [`plugin`] expose those capabilities to scripts.
//! - [`testing`] runs scripts deterministically with mocked activities.

pub mod backend;
pub mod cli;
pub mod codec;
pub mod config;
pub mod engine;
pub mod logging;
pub mod plugin;
pub mod service;
pub mod star;
pub mod testing;
pub mod worker;
pub mod workflow;

//! relstat core
//!
//! Pipeline definition model, trigger matching, credential handling and job
//! planning for the release-SDK status runner. Nothing in this crate spawns
//! processes; it turns a pipeline file plus resolved inputs into a concrete,
//! ordered list of commands for `relstat-runner` to execute.

pub mod credentials;
pub mod error;
pub mod interpolation;
pub mod pipeline;
pub mod plan;
pub mod secrets;
pub mod trigger;
pub mod validation;

pub use error::{Error, Result};

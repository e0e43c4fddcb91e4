//! Perforce command plumbing: config discovery, the `p4` runner, output
//! parsers and the policy gate that wraps every tool call.

pub mod config;
pub mod p4config;
pub mod parse;
pub mod policy;
pub mod runner;

pub use config::{PolicyConfig, RunnerConfig};
pub use p4config::{CommandSetup, ConfigResolution, EffectiveEnv};
pub use parse::Grammar;
pub use policy::PolicyManager;
pub use runner::{OutputFormat, P4Command, Runner};

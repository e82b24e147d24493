//! Shipgate CI: the command-stage build step.
//!
//! Runs an ordered list of shell stages in a working directory and packages
//! the file they leave behind as the run's artifact bytes:
//! - [`stage`]: stage configuration
//! - [`runner`]: single-stage execution with a timeout
//! - [`builder`]: [`CommandBuilder`], the orchestrator's `Builder`

pub mod builder;
pub mod runner;
pub mod stage;

pub use builder::CommandBuilder;
pub use runner::{StageResult, StageRunner};
pub use stage::StageConfig;

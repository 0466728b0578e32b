//! CLI command handling

pub mod check;
pub mod output;
pub mod queue;
pub mod run;

pub use check::*;
pub use output::*;
pub use queue::*;
pub use run::*;

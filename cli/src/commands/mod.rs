//! One module per subcommand. Each `execute` returns the process exit code.

pub mod collect;
pub mod impact;
pub mod path;
pub mod stats;

//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `serve`   | `Serve`          |
//! | `analyze` | `Analyze`        |
//! | `config`  | `Config`         |

pub mod analyze;
pub mod config;
pub mod serve;

pub use analyze::{AnalyzeArgs, cmd_analyze};
pub use config::cmd_config;
pub use serve::cmd_serve;

//! PR analysis workflow and its session-facing server.
//!
//! | Module         | Role                                                   |
//! |----------------|--------------------------------------------------------|
//! | `models`       | Records exchanged with adapters and clients            |
//! | `channel`      | Wire events and per-session delivery                   |
//! | `orchestrator` | One run: issue, PR data, AI documents, terminal event  |
//! | `gateway`      | Validates start commands and spawns runs               |
//! | `ws`           | WebSocket session loop                                 |
//! | `api`          | Health and configuration endpoints                     |
//! | `server`       | Router assembly and HTTP listener                      |
//! | `embedded`     | Browser UI assets                                      |

pub mod api;
pub mod channel;
pub mod embedded;
pub mod gateway;
pub mod models;
pub mod orchestrator;
pub mod server;
pub mod ws;

pub use channel::{MemoryChannel, ProgressChannel, ServerEvent, SessionHub};
pub use gateway::SessionGateway;
pub use models::{AnalysisRequest, AnalysisResult, SessionId, StartAnalysis};
pub use orchestrator::Orchestrator;

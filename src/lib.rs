//! Renshuu · Japanese practice backend for Chinese speakers.
//!
//! Library half of the crate: the binary only wires settings, telemetry and
//! the listener; everything else lives here so integration tests can drive the
//! router directly.

pub mod audio;
pub mod config;
pub mod domain;
pub mod error;
pub mod feedback;
pub mod history;
pub mod logic;
pub mod markdown;
pub mod openai;
pub mod pinyin;
pub mod protocol;
pub mod routes;
pub mod seeds;
pub mod state;
pub mod telemetry;
pub mod util;

pub use routes::build_router;
pub use state::AppState;

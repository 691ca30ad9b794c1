pub mod approval;
pub mod backend;
pub mod completion;
pub mod config;
pub mod error;
pub mod mapping;
pub mod rate_limit;
pub mod server;
pub mod trace;
pub mod translate;

pub use completion::{CompletionOutcome, Gateway, SseEvent};
pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use server::{build_router, AppState};

pub mod collab;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod gate;
pub mod logging;
pub mod orchestrator;
pub mod process;
pub mod types;

// Public API
pub use config::{load_config, load_config_with_source, GatewayConfig};
pub use dispatch::{CapabilityDispatcher, DispatchContext};
pub use error::{ErrorKind, GatewayError};
pub use gate::{CommandGuard, ContentFilter, PolicySnapshot, PolicyStore, RateLimiter};
pub use orchestrator::{Orchestrator, OrchestratorParts};
pub use process::{ProcessClient, ProcessPool, ToolInvoker};
pub use types::{Classification, Intent, Payload, Request, Response, ResponseStatus};

/// qcflow daemon: HTTP API and live notifications for the drawing review workflow
/// Serves workflow commands over HTTP and streams project events to clients over SSE
pub mod auth;
pub mod config;
pub mod errors;
pub mod event_stream;
pub mod events;
pub mod handlers;
pub mod metrics;
pub mod server;
pub mod types;

// Re-export commonly used types
pub use auth::{AuthContext, AuthManager, Claims};
pub use config::DaemonConfig;
pub use errors::{DaemonError, DaemonResult};
pub use event_stream::StreamSettings;
pub use events::{EventHub, EventHubStats, HubEvent, Subscription};
pub use handlers::ApiHandlers;
pub use metrics::MetricsCollector;
pub use server::{HttpServer, ServerHandle};
pub use types::{AuthToken, CommandRequest, CreateDrawingRequest};

/// Daemon version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}

use crate::session::Recorder;
use tokio_util::sync::CancellationToken;

/// Shared application state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    /// The one recording session this service controls
    pub recorder: Recorder,
    /// Port remote controls connect to
    pub port: u16,
    /// Cancelled when a client asks the service to exit
    pub shutdown: CancellationToken,
}

impl AppState {
    pub fn new(recorder: Recorder) -> Self {
        Self {
            recorder,
            port: 5555,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }
}

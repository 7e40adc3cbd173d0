use std::sync::Arc;

use crate::config::Config;
use crate::conversation::SessionStore;
use crate::llm_client::TextGenerator;
use crate::render::PageConfig;
use crate::transport::ChatTransport;

/// Shared application state, handed to the dispatcher and the HTTP routes.
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn SessionStore>,
    /// Pluggable generator. Default: Gemini over HTTP.
    pub generator: Arc<dyn TextGenerator>,
    pub transport: Arc<dyn ChatTransport>,
    /// Page geometry for the rendered PDF: A4, Courier 12pt.
    pub page_config: PageConfig,
}

use std::sync::Arc;

use actix::Addr;

use crate::actors::relay_server::RelayServer;
use crate::auth::TokenVerifier;

/// Shared application state handed to every HTTP worker.
#[derive(Clone)]
pub struct AppState {
    pub relay: Addr<RelayServer>,
    pub verifier: Arc<TokenVerifier>,
}

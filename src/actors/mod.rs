pub mod relay_server;
pub mod relay_session;

/*
 * Copyright 2025 Security Union LLC
 *
 * Licensed under either of
 *
 * * Apache License, Version 2.0
 *   (http://www.apache.org/licenses/LICENSE-2.0)
 * * MIT license
 *   (http://opensource.org/licenses/MIT)
 *
 * at your option.
 */

use std::sync::Arc;
use std::time::Duration;

use actix::Actor;
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use relay_api::{
    actors::relay_server::RelayServer, auth::TokenVerifier, constants::DEFAULT_RING_TIMEOUT,
    lobby::ws_connect, models::AppState,
};
use tracing::{info, warn};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let jwt_secret = std::env::var("JWT_SECRET").unwrap_or_else(|_| {
        warn!("JWT_SECRET not set, falling back to the development secret");
        String::from("dev-secret")
    });
    let ring_timeout = std::env::var("RING_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RING_TIMEOUT);
    let port = std::env::var("ACTIX_PORT")
        .unwrap_or_else(|_| String::from("8080"))
        .parse::<u16>()
        .expect("ACTIX_PORT must be a port number");

    info!(port, ring_timeout_secs = ring_timeout.as_secs(), "starting relay");

    // no membership oracle by default: conversation ids are only handed to
    // participants by the HTTP API, so joins are open at this layer
    let relay = RelayServer::new(ring_timeout, None).start();
    let verifier = Arc::new(TokenVerifier::new(&jwt_secret));

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(AppState {
                relay: relay.clone(),
                verifier: verifier.clone(),
            }))
            .wrap(cors)
            .service(ws_connect)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}

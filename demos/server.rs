//! Runnable demo: a Pair-Setup-only HAP server backed by `MemoryBackend`.
//! Useful for exercising the handshake against a real controller (or the
//! `hap-rs` client test vectors) without a persistent accessory database.

use std::sync::{Arc, Mutex};

use hap_core::config::Config;
use hap_core::db::MemoryBackend;
use hap_core::event::EventEmitter;
use hap_core::protocol::SetupCode;
use hap_core::transport::http::handler::health::Health;
use hap_core::transport::http::handler::pair_setup::PairSetup;
use hap_core::transport::http::RouterBuilder;
use hap_core::transport::serve;

fn main() {
    env_logger::init();

    let setup_code = std::env::var("HAP_SETUP_CODE").unwrap_or_else(|_| "843-15-743".to_string());
    let setup_code = SetupCode::parse(&setup_code).expect("HAP_SETUP_CODE must match \\d{3}-\\d{2}-\\d{3}");

    let config = Arc::new(Mutex::new(Config::new(setup_code)));
    let database = Arc::new(Mutex::new(MemoryBackend::new()));
    let events = Arc::new(Mutex::new(EventEmitter::new()));

    events.lock().expect("event emitter lock poisoned").on(|event| {
        log::info!("pairing event: {:?}", event);
    });

    let router = RouterBuilder::new()
        .get("/", Box::new(Health))
        .post("/pair-setup", Box::new(PairSetup))
        .build();

    if let Err(e) = serve(config, database, events, router) {
        log::error!("server exited: {}", e);
        std::process::exit(1);
    }
}

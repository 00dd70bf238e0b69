//! Server configuration, passed explicitly into the server constructor
//! instead of living as module-level globals (spec §9 design note: the
//! upstream `hap` crate's module-level `HANDLERS`/`SETUP_CODE` become
//! explicit configuration here).

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::protocol::SetupCode;

#[derive(Clone)]
pub struct Config {
    /// The accessory's setup code, e.g. `843-15-743`.
    pub setup_code: SetupCode,
    /// Address the connection loop binds to. Defaults to `127.0.0.1:8080`.
    pub bind_addr: SocketAddr,
    /// Maximum number of concurrent admin pairings this accessory accepts.
    pub max_peers: Option<usize>,
    /// Inactivity timeout per spec §4.5 (default 1000s).
    pub read_timeout: Duration,
    /// Whether a Pair-Setup attempt is currently underway on some
    /// connection. Pair-Setup is a whole-accessory resource (spec §4.3):
    /// a concurrent M1 on another connection gets `BUSY`, not a race.
    pub pairing_in_progress: bool,
}

impl Config {
    pub fn new(setup_code: SetupCode) -> Config {
        Config {
            setup_code,
            bind_addr: "127.0.0.1:8080".parse().expect("valid default socket address"),
            max_peers: None,
            read_timeout: Duration::from_secs(1000),
            pairing_in_progress: false,
        }
    }
}

pub type ConfigPtr = Arc<Mutex<Config>>;

//! The `Backend` contract (spec §6): storage for accessory state and
//! pairing records, consumed but not prescribed by this core. Grounded on
//! the upstream `hap` crate's `db::DatabasePtr`, referenced from both
//! `pair_setup.rs` and `pair_verify.rs` as a shared, lock-guarded handle.

use std::sync::{Arc, Mutex};

use failure::Error;

use crate::protocol::{AccessoryIdentity, Pairing};

/// Any object that can load and store accessory state. The core does not
/// prescribe a format beyond this shape; a real deployment would back
/// this with a file or a database.
pub trait Backend {
    /// Returns this accessory's long-term identity, generating and
    /// persisting one on first call if none exists yet.
    fn accessory_identity(&mut self) -> Result<AccessoryIdentity, Error>;

    /// Persists a newly created pairing. Called once, at the end of a
    /// successful M5/M6 exchange.
    fn store_pairing(&mut self, pairing: Pairing) -> Result<(), Error>;

    /// Looks up a previously stored pairing by controller pairing id.
    /// Out of scope for Pair-Setup itself (Pair-Verify would use this),
    /// kept on the trait because it is the natural counterpart to
    /// `store_pairing` and costs nothing to name here.
    fn load_pairing(&self, pairing_id: &str) -> Result<Option<Pairing>, Error>;

    /// Number of pairings currently stored, used to enforce `max_peers`.
    fn count_pairings(&self) -> Result<usize, Error>;
}

/// Shared, lock-guarded handle to a `Backend`. Mutations must be
/// serialized across connections (spec §5); a `Mutex` is sufficient since
/// the only suspension points around backend access are short.
pub type DatabasePtr = Arc<Mutex<dyn Backend + Send>>;

/// An in-memory `Backend`, sufficient to run the demo binary and the
/// end-to-end tests. Grounded on the original Python implementation's
/// `backends/memory.py`: no persistence across restarts, a plain
/// in-process store guarded the same way the rest of this crate guards
/// shared state.
#[derive(Default)]
pub struct MemoryBackend {
    identity: Option<AccessoryIdentity>,
    pairings: Vec<Pairing>,
}

impl MemoryBackend {
    pub fn new() -> MemoryBackend {
        MemoryBackend::default()
    }
}

impl Backend for MemoryBackend {
    fn accessory_identity(&mut self) -> Result<AccessoryIdentity, Error> {
        if self.identity.is_none() {
            self.identity = Some(AccessoryIdentity::generate());
        }
        Ok(self.identity.clone().expect("just initialized above"))
    }

    fn store_pairing(&mut self, pairing: Pairing) -> Result<(), Error> {
        self.pairings.retain(|p| p.pairing_id != pairing.pairing_id);
        self.pairings.push(pairing);
        Ok(())
    }

    fn load_pairing(&self, pairing_id: &str) -> Result<Option<Pairing>, Error> {
        Ok(self.pairings.iter().find(|p| p.pairing_id == pairing_id).cloned())
    }

    fn count_pairings(&self) -> Result<usize, Error> {
        Ok(self.pairings.len())
    }
}

//! Core TLV8 framing, SRP Pair-Setup key exchange, and HTTP/1.1 transport
//! for a HomeKit Accessory Protocol server. This crate implements the
//! Pair-Setup handshake (M1–M6) end to end; the accessory data model,
//! mDNS advertisement, and everything past Pair-Setup (Pair-Verify,
//! characteristic read/write) are out of scope and left to a consumer
//! built on top of the `Backend`/`TypeCatalog` traits in `db`/`protocol`.

pub mod config;
pub mod crypto;
pub mod db;
pub mod event;
pub mod protocol;
pub mod session;
pub mod transport;

//! The data model this core consumes but does not own: accessory
//! identity, pairing records, TLV8 framing, and the read-only catalog of
//! characteristic/service *types* (not values — those live in the
//! accessory data model, out of scope here; see spec §1/§6).

pub mod device;
pub mod pairing;
pub mod tlv;

pub use self::device::{AccessoryIdentity, InvalidSetupCode, SetupCode};
pub use self::pairing::{Pairing, Permissions};

use uuid::Uuid;

/// A characteristic type as named in the read-only catalog (§6). Only the
/// identifying UUID matters to this core; value/format/unit semantics are
/// part of the accessory data model and are out of scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CharacteristicType {
    pub uuid: Uuid,
}

/// A service type as named in the read-only catalog (§6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceType {
    pub uuid: Uuid,
}

/// Read-only catalog of known characteristic/service types, consumed by
/// the (out-of-scope) accessory data model. This core only needs the
/// shape of the contract, not an implementation.
pub trait TypeCatalog {
    fn characteristic_by_uuid(&self, uuid: &Uuid) -> Option<&CharacteristicType>;
    fn service_by_uuid(&self, uuid: &Uuid) -> Option<&ServiceType>;
}

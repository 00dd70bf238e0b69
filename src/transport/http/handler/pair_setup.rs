//! `POST /pair-setup`: the M1–M6 SRP handshake (spec §4.3), adapted from
//! the upstream `hap` crate's `pair_setup.rs` onto the shared `Session`
//! state machine instead of a handler-private field.

use std::ops::BitXor;

use chacha20_poly1305_aead;
use crypto::ed25519;
use log::{debug, warn};
use num::BigUint;
use rand::{self, RngCore};
use sha2::{Digest, Sha512};
use srp::server::SrpServer;
use srp::types::SrpGroup;
use uuid::Uuid;

use crate::config::ConfigPtr;
use crate::crypto::{hkdf_sha512_32, nonce};
use crate::db::DatabasePtr;
use crate::event::{Event, EventEmitterPtr};
use crate::protocol::tlv::{self, Type, Value};
use crate::protocol::{Pairing, Permissions};
use crate::session::{group, PairingState, PeerIdentity, Session, SrpSetupSession};

use super::super::{Request, Response};
use super::{dispatch_tlv, Handler, ParseError, TlvHandler};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PairMethod {
    PairSetup = 0,
    PairSetupWithAuth = 1,
}

enum StepNumber {
    StartRes = 2,
    VerifyRes = 4,
    ExchangeRes = 6,
}

pub enum Step {
    Start,
    Verify { a_pub: Vec<u8>, a_proof: Vec<u8> },
    Exchange { data: Vec<u8> },
}

pub struct PairSetup;

impl Handler for PairSetup {
    fn call(
        &self,
        req: &Request,
        session: &mut Session,
        config: &ConfigPtr,
        database: &DatabasePtr,
        events: &EventEmitterPtr,
    ) -> Response {
        dispatch_tlv(self, req, session, config, database, events)
    }
}

impl TlvHandler for PairSetup {
    type ParseResult = Step;

    fn parse(&self, decoded: &tlv::Container) -> Result<Step, ParseError> {
        match tlv::find(decoded, Type::State) {
            Some(Value::State(s)) if *s == 1 => match tlv::find(decoded, Type::Method) {
                Some(Value::Method(m)) if *m == PairMethod::PairSetupWithAuth as u64 => Ok(Step::Start),
                Some(Value::Method(m)) if *m == PairMethod::PairSetup as u64 => Err(ParseError::Protocol(
                    tlv::ErrorContainer::new(StepNumber::StartRes as u8, tlv::Error::Authentication),
                )),
                _ => Err(ParseError::Protocol(tlv::ErrorContainer::new(
                    StepNumber::StartRes as u8,
                    tlv::Error::Unknown,
                ))),
            },
            Some(Value::State(s)) if *s == 3 => {
                let mut decoded = decoded.clone();
                let a_pub = match tlv::take(&mut decoded, Type::PublicKey) {
                    Some(Value::PublicKey(b)) => b,
                    _ => {
                        return Err(ParseError::Protocol(tlv::ErrorContainer::new(
                            StepNumber::VerifyRes as u8,
                            tlv::Error::Unknown,
                        )))
                    },
                };
                let a_proof = match tlv::take(&mut decoded, Type::Proof) {
                    Some(Value::Proof(b)) => b,
                    _ => {
                        return Err(ParseError::Protocol(tlv::ErrorContainer::new(
                            StepNumber::VerifyRes as u8,
                            tlv::Error::Unknown,
                        )))
                    },
                };
                Ok(Step::Verify { a_pub, a_proof })
            },
            Some(Value::State(s)) if *s == 5 => {
                let mut decoded = decoded.clone();
                let data = match tlv::take(&mut decoded, Type::EncryptedData) {
                    Some(Value::EncryptedData(b)) => b,
                    _ => {
                        return Err(ParseError::Protocol(tlv::ErrorContainer::new(
                            StepNumber::ExchangeRes as u8,
                            tlv::Error::Unknown,
                        )))
                    },
                };
                Ok(Step::Exchange { data })
            },
            _ => Err(ParseError::UnrecognizedState),
        }
    }

    fn handle(
        &self,
        step: Step,
        session: &mut Session,
        config: &ConfigPtr,
        database: &DatabasePtr,
        events: &EventEmitterPtr,
    ) -> Result<tlv::Container, tlv::ErrorContainer> {
        match step {
            Step::Start => handle_start(session, config, database)
                .map_err(|e| tlv::ErrorContainer::new(StepNumber::StartRes as u8, e)),
            Step::Verify { a_pub, a_proof } => handle_verify(session, config, &a_pub, &a_proof)
                .map_err(|e| tlv::ErrorContainer::new(StepNumber::VerifyRes as u8, e)),
            Step::Exchange { data } => handle_exchange(session, config, database, events, &data)
                .map_err(|e| tlv::ErrorContainer::new(StepNumber::ExchangeRes as u8, e)),
        }
    }
}

/// Releases the whole-accessory "a Pair-Setup attempt is underway"
/// coordination flag (spec §4.3: concurrent M1 elsewhere gets `BUSY`).
fn release_pairing_lock(config: &ConfigPtr) {
    config.lock().expect("config lock poisoned").pairing_in_progress = false;
}

fn handle_start(session: &mut Session, config: &ConfigPtr, database: &DatabasePtr) -> Result<tlv::Container, tlv::Error> {
    debug!("M1: got SRP start request");

    if session.total_attempts > 99 {
        return Err(tlv::Error::MaxTries);
    }

    let has_admin_pairing = database.lock().expect("database lock poisoned").count_pairings()? > 0;
    if has_admin_pairing {
        return Err(tlv::Error::Unavailable);
    }

    let setup_code = {
        let mut config = config.lock().expect("config lock poisoned");
        if config.pairing_in_progress {
            return Err(tlv::Error::Busy);
        }
        config.pairing_in_progress = true;
        config.setup_code.clone()
    };

    let mut rng = rand::thread_rng();
    let mut salt = vec![0u8; 16];
    rng.fill_bytes(&mut salt);
    let mut b = vec![0u8; 64];
    rng.fill_bytes(&mut b);

    let private_key = srp::client::srp_private_key::<Sha512>(b"Pair-Setup", setup_code.as_str().as_bytes(), &salt);
    let srp_client = srp::client::SrpClient::<Sha512>::new(&private_key, group());
    let verifier = srp_client.get_password_verifier(&private_key);

    let user = srp::server::UserRecord { username: b"Pair-Setup", salt: &salt, verifier: &verifier };
    let srp_server = match SrpServer::<Sha512>::new(&user, b"", &b, group()) {
        Ok(s) => s,
        Err(e) => {
            release_pairing_lock(config);
            return Err(e.into());
        },
    };
    let b_pub = srp_server.get_b_pub();

    session.state = PairingState::SrpStarted(SrpSetupSession::new(salt.clone(), verifier, b, b_pub.clone()));

    debug!("M2: sending SRP start response");
    Ok(vec![Value::State(StepNumber::StartRes as u64), Value::PublicKey(b_pub), Value::Salt(salt)])
}

fn handle_verify(
    session: &mut Session,
    config: &ConfigPtr,
    a_pub: &[u8],
    a_proof: &[u8],
) -> Result<tlv::Container, tlv::Error> {
    debug!("M3: got SRP verify request");

    let srp_session = match &mut session.state {
        PairingState::SrpStarted(s) => s,
        _ => {
            warn!("M3: verify request with no SRP session in progress");
            return Err(tlv::Error::Unknown);
        },
    };

    let srp_server = match srp_session.server(a_pub) {
        Ok(s) => s,
        Err(e) => {
            release_pairing_lock(config);
            return Err(e.into());
        },
    };
    let shared_secret = srp_server.get_key();
    let shared_secret = shared_secret.as_slice().to_vec();

    let b_proof = match verify_client_proof::<Sha512>(
        &srp_session.b_pub,
        a_pub,
        a_proof,
        &srp_session.salt,
        &shared_secret,
        group(),
    ) {
        Ok(proof) => proof,
        Err(e) => {
            release_pairing_lock(config);
            return Err(e);
        },
    };

    srp_session.a_pub = Some(a_pub.to_vec());
    let mut encryption_key = [0u8; 32];
    encryption_key.copy_from_slice(&hkdf_sha512_32(&shared_secret, b"Pair-Setup-Encrypt-Salt", b"Pair-Setup-Encrypt-Info"));
    srp_session.shared_secret = Some(shared_secret);

    if let PairingState::SrpStarted(srp_session) = std::mem::replace(&mut session.state, PairingState::Idle) {
        session.state = PairingState::SrpKeyed(srp_session, encryption_key);
    }

    debug!("M4: sending SRP verify response");
    Ok(vec![Value::State(StepNumber::VerifyRes as u64), Value::Proof(b_proof)])
}

fn handle_exchange(
    session: &mut Session,
    config: &ConfigPtr,
    database: &DatabasePtr,
    events: &EventEmitterPtr,
    data: &[u8],
) -> Result<tlv::Container, tlv::Error> {
    debug!("M5: got SRP exchange request");

    let (srp_session, encryption_key) = match &session.state {
        PairingState::SrpKeyed(s, k) => (s, *k),
        _ => {
            warn!("M5: exchange request with no verified SRP session");
            return Err(tlv::Error::Unknown);
        },
    };
    let shared_secret = srp_session.shared_secret.clone().expect("keyed session always carries the shared secret");

    let result = handle_exchange_inner(&shared_secret, encryption_key, config, database, data);
    release_pairing_lock(config);

    match result {
        Ok((container, pairing)) => {
            database.lock().expect("database lock poisoned").store_pairing(pairing.clone())?;
            events.lock().expect("event emitter lock poisoned").emit(&Event::DevicePaired);
            session.state = PairingState::Paired(PeerIdentity {
                pairing_id: pairing.pairing_id,
                public_key: pairing.public_key,
            });
            debug!("M6: sending SRP exchange response");
            Ok(container)
        },
        Err(e) => Err(e),
    }
}

/// The bulk of M5: decrypt the controller's sub-TLV, verify its signature,
/// check `max_peers`, and encrypt the accessory's own reply. Split out of
/// `handle_exchange` so the pairing lock can be released on every exit
/// path (including the success path) from a single call site.
fn handle_exchange_inner(
    shared_secret: &[u8],
    encryption_key: [u8; 32],
    config: &ConfigPtr,
    database: &DatabasePtr,
    data: &[u8],
) -> Result<(tlv::Container, Pairing), tlv::Error> {
    if data.len() < 16 {
        return Err(tlv::Error::Unknown);
    }
    let (encrypted_data, auth_tag) = data.split_at(data.len() - 16);

    let mut decrypted_data = Vec::new();
    chacha20_poly1305_aead::decrypt(
        &encryption_key,
        &nonce(b"PS-Msg05"),
        &[],
        encrypted_data,
        auth_tag,
        &mut decrypted_data,
    )?;

    let sub_tlv = tlv::decode(&decrypted_data)?;
    let device_pairing_id = match tlv::find(&sub_tlv, Type::Identifier) {
        Some(Value::Identifier(s)) => s.clone(),
        _ => return Err(tlv::Error::Unknown),
    };
    let device_ltpk = match tlv::find(&sub_tlv, Type::PublicKey) {
        Some(Value::PublicKey(b)) => b.clone(),
        _ => return Err(tlv::Error::Unknown),
    };
    let device_signature = match tlv::find(&sub_tlv, Type::Signature) {
        Some(Value::Signature(b)) => b.clone(),
        _ => return Err(tlv::Error::Unknown),
    };

    let device_x = hkdf_sha512_32(shared_secret, b"Pair-Setup-Controller-Sign-Salt", b"Pair-Setup-Controller-Sign-Info");
    let mut device_info = Vec::new();
    device_info.extend_from_slice(&device_x);
    device_info.extend_from_slice(device_pairing_id.as_bytes());
    device_info.extend_from_slice(&device_ltpk);
    if device_signature.len() != 64 || !ed25519::verify(&device_info, &device_ltpk, &device_signature) {
        warn!("M5: controller signature verification failed");
        return Err(tlv::Error::Authentication);
    }

    Uuid::parse_str(&device_pairing_id).map_err(|_| tlv::Error::Unknown)?;
    let mut pairing_ltpk = [0u8; 32];
    pairing_ltpk.copy_from_slice(&device_ltpk[..32]);

    {
        let mut database = database.lock().expect("database lock poisoned");
        let already_paired = database.load_pairing(&device_pairing_id)?;
        match already_paired {
            Some(existing) if existing.public_key != pairing_ltpk => return Err(tlv::Error::Unknown),
            Some(_) => {},
            None => {
                if let Some(max_peers) = config.lock().expect("config lock poisoned").max_peers {
                    if database.count_pairings()? + 1 > max_peers {
                        return Err(tlv::Error::MaxPeers);
                    }
                }
            },
        }
    }

    let accessory = database.lock().expect("database lock poisoned").accessory_identity()?;

    let accessory_x = hkdf_sha512_32(shared_secret, b"Pair-Setup-Accessory-Sign-Salt", b"Pair-Setup-Accessory-Sign-Info");
    let mut accessory_info = Vec::new();
    accessory_info.extend_from_slice(&accessory_x);
    accessory_info.extend_from_slice(accessory.id.as_bytes());
    accessory_info.extend_from_slice(&accessory.public_key);
    let accessory_signature = accessory.sign(&accessory_info);

    let reply_sub_tlv = vec![
        Value::Identifier(accessory.id.clone()),
        Value::PublicKey(accessory.public_key.to_vec()),
        Value::Signature(accessory_signature.to_vec()),
    ];
    let encoded_sub_tlv = tlv::encode(&reply_sub_tlv);

    let mut reply_encrypted = Vec::new();
    let reply_tag = chacha20_poly1305_aead::encrypt(
        &encryption_key,
        &nonce(b"PS-Msg06"),
        &[],
        &encoded_sub_tlv,
        &mut reply_encrypted,
    )?;
    reply_encrypted.extend_from_slice(&reply_tag);

    let pairing = Pairing::new(device_pairing_id, Permissions::Admin, pairing_ltpk);

    Ok((vec![Value::State(StepNumber::ExchangeRes as u64), Value::EncryptedData(reply_encrypted)], pairing))
}

/// `M = H(H(N) xor H(g), H(I), s, A, B, K)`, the client's SRP proof; checked
/// against the value the controller sent, and `H(A, M, K)` computed in
/// reply if it matches.
fn verify_client_proof<D: Digest>(
    b_pub: &[u8],
    a_pub: &[u8],
    a_proof: &[u8],
    salt: &[u8],
    key: &[u8],
    group: &SrpGroup,
) -> Result<Vec<u8>, tlv::Error> {
    let mut dhn = D::new();
    dhn.input(&group.n.to_bytes_be());
    let hn = BigUint::from_bytes_be(&dhn.result());

    let mut dhg = D::new();
    dhg.input(&group.g.to_bytes_be());
    let hg = BigUint::from_bytes_be(&dhg.result());

    let hng = hn.bitxor(hg);

    let mut dhi = D::new();
    dhi.input(b"Pair-Setup");
    let hi = dhi.result();

    let mut d = D::new();
    d.input(&hng.to_bytes_be());
    d.input(&hi);
    d.input(salt);
    d.input(a_pub);
    d.input(b_pub);
    d.input(key);

    if a_proof == d.result().as_slice() {
        let mut d = D::new();
        d.input(a_pub);
        d.input(a_proof);
        d.input(key);
        Ok(d.result().as_slice().to_vec())
    } else {
        Err(tlv::Error::Authentication)
    }
}

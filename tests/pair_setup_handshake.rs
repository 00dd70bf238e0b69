//! Drives the real `PairSetup` handler through a full M1-M6 handshake
//! with a client simulator standing in for a controller, and checks the
//! accessory's Ed25519 signature the same way a controller would.

use std::sync::{Arc, Mutex};

use crypto::ed25519;
use rand::{self, RngCore};
use sha2::Sha512;
use srp::client::SrpClient;
use uuid::Uuid;

use hap_core::config::{Config, ConfigPtr};
use hap_core::crypto::{hkdf_sha512_32, nonce};
use hap_core::db::{DatabasePtr, MemoryBackend};
use hap_core::event::EventEmitterPtr;
use hap_core::protocol::tlv::{self, Type, Value};
use hap_core::protocol::SetupCode;
use hap_core::session::Session;
use hap_core::transport::http::handler::pair_setup::PairSetup;
use hap_core::transport::http::handler::Handler;
use hap_core::transport::http::{Method, Request, CONTENT_TYPE_TLV8};

const SETUP_CODE: &str = "843-15-743";

fn harness() -> (ConfigPtr, DatabasePtr, EventEmitterPtr) {
    let config = Arc::new(Mutex::new(Config::new(SetupCode::parse(SETUP_CODE).unwrap())));
    let database: DatabasePtr = Arc::new(Mutex::new(MemoryBackend::new()));
    let events: EventEmitterPtr = Arc::new(Mutex::new(hap_core::event::EventEmitter::new()));
    (config, database, events)
}

fn tlv_request(body: Vec<u8>) -> Request {
    Request {
        method: Method::Post,
        path: "/pair-setup".into(),
        query: Default::default(),
        headers: vec![("content-type".to_string(), CONTENT_TYPE_TLV8.to_string())].into_iter().collect(),
        body,
    }
}

#[test]
fn full_handshake_yields_verifiable_accessory_signature() {
    let (config, database, events) = harness();
    let mut session = Session::new();
    let handler = PairSetup;

    // M1 -> M2
    let m1 = tlv::encode(&vec![Value::State(1), Value::Method(1)]);
    let resp = handler.call(&tlv_request(m1), &mut session, &config, &database, &events);
    assert_eq!(resp.status, 200);
    let m2 = tlv::decode(&resp.body).unwrap();
    assert_eq!(tlv::find(&m2, Type::State), Some(&Value::State(2)));
    let salt = match tlv::find(&m2, Type::Salt) {
        Some(Value::Salt(s)) => s.clone(),
        _ => panic!("M2 missing salt"),
    };
    let b_pub = match tlv::find(&m2, Type::PublicKey) {
        Some(Value::PublicKey(b)) => b.clone(),
        _ => panic!("M2 missing server public key"),
    };

    // Client side of M3: derive the same password verifier the server
    // derived from the setup code, using the salt it just sent us.
    let mut a = vec![0u8; 64];
    rand::thread_rng().fill_bytes(&mut a);
    let client = SrpClient::<Sha512>::new(&a, hap_core::session::group());
    let a_pub = client.get_a_pub();
    let verifier = client
        .process_reply(b"Pair-Setup", SETUP_CODE.as_bytes(), &salt, &b_pub)
        .expect("client SRP math must agree with the server's");

    let m3 = tlv::encode(&vec![Value::State(3), Value::PublicKey(a_pub.clone()), Value::Proof(verifier.get_proof().to_vec())]);
    let resp = handler.call(&tlv_request(m3), &mut session, &config, &database, &events);
    assert_eq!(resp.status, 200);
    let m4 = tlv::decode(&resp.body).unwrap();
    assert_eq!(tlv::find(&m4, Type::State), Some(&Value::State(4)));
    let b_proof = match tlv::find(&m4, Type::Proof) {
        Some(Value::Proof(p)) => p.clone(),
        _ => panic!("M4 missing server proof"),
    };
    verifier.verify_server(&b_proof).expect("server proof must check out against the shared key");

    let shared_secret = verifier.get_key().as_slice().to_vec();

    // M5: the controller signs its long-term identity and sends it
    // encrypted under the Pair-Setup session key.
    let mut device_seed = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut device_seed);
    let (device_private, device_ltpk) = ed25519::keypair(&device_seed);
    let device_pairing_id = Uuid::new_v4().to_string();

    let device_x = hkdf_sha512_32(&shared_secret, b"Pair-Setup-Controller-Sign-Salt", b"Pair-Setup-Controller-Sign-Info");
    let mut device_info = Vec::new();
    device_info.extend_from_slice(&device_x);
    device_info.extend_from_slice(device_pairing_id.as_bytes());
    device_info.extend_from_slice(&device_ltpk);
    let device_signature = ed25519::signature(&device_info, &device_private);

    let sub_tlv = tlv::encode(&vec![
        Value::Identifier(device_pairing_id.clone()),
        Value::PublicKey(device_ltpk.to_vec()),
        Value::Signature(device_signature.to_vec()),
    ]);

    let encryption_key = hkdf_sha512_32(&shared_secret, b"Pair-Setup-Encrypt-Salt", b"Pair-Setup-Encrypt-Info");
    let mut encrypted = Vec::new();
    let tag = chacha20_poly1305_aead::encrypt(&encryption_key, &nonce(b"PS-Msg05"), &[], &sub_tlv, &mut encrypted).unwrap();
    encrypted.extend_from_slice(&tag);

    let m5 = tlv::encode(&vec![Value::State(5), Value::EncryptedData(encrypted)]);
    let resp = handler.call(&tlv_request(m5), &mut session, &config, &database, &events);
    assert_eq!(resp.status, 200);
    let m6 = tlv::decode(&resp.body).unwrap();
    assert_eq!(tlv::find(&m6, Type::State), Some(&Value::State(6)));
    assert_eq!(tlv::find(&m6, Type::Error), None, "a completed handshake carries no in-band error");

    let reply_encrypted = match tlv::find(&m6, Type::EncryptedData) {
        Some(Value::EncryptedData(b)) => b.clone(),
        _ => panic!("M6 missing encrypted data"),
    };
    let (reply_ciphertext, reply_tag) = reply_encrypted.split_at(reply_encrypted.len() - 16);
    let mut decrypted = Vec::new();
    chacha20_poly1305_aead::decrypt(&encryption_key, &nonce(b"PS-Msg06"), &[], reply_ciphertext, reply_tag, &mut decrypted)
        .expect("accessory's M6 reply must decrypt under the session key");

    let reply_tlv = tlv::decode(&decrypted).unwrap();
    let accessory_id = match tlv::find(&reply_tlv, Type::Identifier) {
        Some(Value::Identifier(s)) => s.clone(),
        _ => panic!("M6 reply missing accessory identifier"),
    };
    let accessory_ltpk = match tlv::find(&reply_tlv, Type::PublicKey) {
        Some(Value::PublicKey(b)) => b.clone(),
        _ => panic!("M6 reply missing accessory public key"),
    };
    let accessory_signature = match tlv::find(&reply_tlv, Type::Signature) {
        Some(Value::Signature(b)) => b.clone(),
        _ => panic!("M6 reply missing accessory signature"),
    };

    let accessory_x = hkdf_sha512_32(&shared_secret, b"Pair-Setup-Accessory-Sign-Salt", b"Pair-Setup-Accessory-Sign-Info");
    let mut accessory_info = Vec::new();
    accessory_info.extend_from_slice(&accessory_x);
    accessory_info.extend_from_slice(accessory_id.as_bytes());
    accessory_info.extend_from_slice(&accessory_ltpk);
    assert!(
        ed25519::verify(&accessory_info, &accessory_ltpk, &accessory_signature),
        "accessory's M6 signature must verify against its own long-term public key"
    );

    assert_eq!(database.lock().unwrap().count_pairings().unwrap(), 1);
    let stored = database.lock().unwrap().load_pairing(&device_pairing_id).unwrap();
    assert!(stored.is_some(), "a successful exchange stores the controller's pairing");
    assert!(!config.lock().unwrap().pairing_in_progress, "the pairing-in-progress flag is released on success");
}

#[test]
fn second_pairing_attempt_is_rejected_as_unavailable() {
    let (config, database, events) = harness();

    {
        let mut session = Session::new();
        let handler = PairSetup;
        let m1 = tlv::encode(&vec![Value::State(1), Value::Method(1)]);
        let resp = handler.call(&tlv_request(m1), &mut session, &config, &database, &events);
        let decoded = tlv::decode(&resp.body).unwrap();
        assert_eq!(tlv::find(&decoded, Type::State), Some(&Value::State(2)));
    }

    database
        .lock()
        .unwrap()
        .store_pairing(hap_core::protocol::Pairing::new("already-paired".into(), hap_core::protocol::Permissions::Admin, [9u8; 32]))
        .unwrap();

    let mut session = Session::new();
    let handler = PairSetup;
    let m1 = tlv::encode(&vec![Value::State(1), Value::Method(1)]);
    let resp = handler.call(&tlv_request(m1), &mut session, &config, &database, &events);
    let decoded = tlv::decode(&resp.body).unwrap();
    assert_eq!(tlv::find(&decoded, Type::Error), Some(&Value::Error(tlv::Error::Unavailable as u64)));
}

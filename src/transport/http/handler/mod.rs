//! Handler registry glue: the `Handler` trait every route implements,
//! the `TlvHandler` trait the Pair-Setup state machine implements (same
//! split the upstream `hap` crate uses in `transport::http::handler`),
//! and the dispatch logic that turns a `TlvHandler`'s in-band/out-of-band
//! errors into the right HTTP response per spec §7.

pub mod health;
pub mod pair_setup;

use crate::config::ConfigPtr;
use crate::db::DatabasePtr;
use crate::event::EventEmitterPtr;
use crate::protocol::tlv;
use crate::session::Session;

use super::{Request, RequestError, Response, CONTENT_TYPE_TLV8};

/// Anything reachable from the router. Handlers are constructed once and
/// shared read-only across connections; all per-connection mutable state
/// lives in `Session`, passed in explicitly.
pub trait Handler: Send + Sync {
    fn call(
        &self,
        req: &Request,
        session: &mut Session,
        config: &ConfigPtr,
        database: &DatabasePtr,
        events: &EventEmitterPtr,
    ) -> Response;
}

/// A parse error that distinguishes a request the state machine has never
/// heard of (§6: "unrecognized `State` value" → 422) from one whose shape
/// it recognizes but rejects (§4.3: in-band `(State, Error=UNKNOWN)` → 200).
pub enum ParseError {
    UnrecognizedState,
    Protocol(tlv::ErrorContainer),
}

/// The stateful TLV8 handlers implement this instead of `Handler`
/// directly; `dispatch_tlv` adapts it to the wire per spec §4.3/§7.
pub trait TlvHandler {
    type ParseResult;

    fn parse(&self, body: &tlv::Container) -> Result<Self::ParseResult, ParseError>;

    fn handle(
        &self,
        step: Self::ParseResult,
        session: &mut Session,
        config: &ConfigPtr,
        database: &DatabasePtr,
        events: &EventEmitterPtr,
    ) -> Result<tlv::Container, tlv::ErrorContainer>;
}

/// Runs a `TlvHandler` against a raw request, handling content-type
/// checking, TLV decoding, and in-band vs. out-of-band error mapping.
pub fn dispatch_tlv<H: TlvHandler>(
    handler: &H,
    req: &Request,
    session: &mut Session,
    config: &ConfigPtr,
    database: &DatabasePtr,
    events: &EventEmitterPtr,
) -> Response {
    if req.content_type() != Some(CONTENT_TYPE_TLV8) {
        return RequestError::WrongContentType.into_response();
    }

    let decoded = match tlv::decode(&req.body) {
        Ok(values) => values,
        Err(_) => return RequestError::MalformedTlv.into_response(),
    };

    let step = match handler.parse(&decoded) {
        Ok(step) => step,
        Err(ParseError::UnrecognizedState) => return RequestError::UnrecognizedState.into_response(),
        Err(ParseError::Protocol(err)) => {
            session.record_failure();
            return tlv_response(err.into_container());
        },
    };

    match handler.handle(step, session, config, database, events) {
        Ok(container) => {
            session.record_success();
            tlv_response(container)
        },
        Err(err) => {
            let backoff = session.record_failure();
            let mut container = err.into_container();
            if backoff && err.error == tlv::Error::Authentication {
                container.push(tlv::Value::RetryDelay(2));
                // Overwrite the plain AUTHENTICATION error with BACKOFF,
                // per spec §7: a second consecutive failure escalates.
                if let Some(pos) = container.iter().position(|v| v.tag() == tlv::Type::Error) {
                    container[pos] = tlv::Value::Error(tlv::Error::Backoff as u64);
                }
            }
            tlv_response(container)
        },
    }
}

fn tlv_response(container: tlv::Container) -> Response {
    Response::new(200, CONTENT_TYPE_TLV8, tlv::encode(&container))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::MemoryBackend;
    use crate::event::EventEmitter;
    use crate::protocol::SetupCode;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    fn harness() -> (ConfigPtr, DatabasePtr, EventEmitterPtr) {
        let config: ConfigPtr = Arc::new(Mutex::new(Config::new(SetupCode::parse("843-15-743").unwrap())));
        let database: DatabasePtr = Arc::new(Mutex::new(MemoryBackend::new()));
        let events: EventEmitterPtr = Arc::new(Mutex::new(EventEmitter::new()));
        (config, database, events)
    }

    struct AlwaysUnknown;
    impl TlvHandler for AlwaysUnknown {
        type ParseResult = ();

        fn parse(&self, decoded: &tlv::Container) -> Result<(), ParseError> {
            match tlv::find(decoded, tlv::Type::State) {
                Some(tlv::Value::State(1)) => Ok(()),
                Some(tlv::Value::State(_)) | None => Err(ParseError::UnrecognizedState),
            }
        }

        fn handle(
            &self,
            _step: (),
            _session: &mut Session,
            _config: &ConfigPtr,
            _database: &DatabasePtr,
            _events: &EventEmitterPtr,
        ) -> Result<tlv::Container, tlv::ErrorContainer> {
            Err(tlv::ErrorContainer::new(2, tlv::Error::Unknown))
        }
    }

    fn req_with(body: Vec<u8>, content_type: Option<&str>) -> Request {
        let mut headers = HashMap::new();
        if let Some(ct) = content_type {
            headers.insert("content-type".to_string(), ct.to_string());
        }
        Request {
            method: super::super::Method::Post,
            path: "/pair-setup".into(),
            query: HashMap::new(),
            headers,
            body,
        }
    }

    #[test]
    fn wrong_content_type_is_400() {
        let (config, database, events) = harness();
        let mut session = Session::new();
        let req = req_with(Vec::new(), Some("text/plain"));
        let resp = dispatch_tlv(&AlwaysUnknown, &req, &mut session, &config, &database, &events);
        assert_eq!(resp.status, 400);
        assert_eq!(resp.body, b"Expected a TLV encoded request".to_vec());
    }

    #[test]
    fn malformed_tlv_is_400() {
        let (config, database, events) = harness();
        let mut session = Session::new();
        let req = req_with(vec![0x06], Some(CONTENT_TYPE_TLV8));
        let resp = dispatch_tlv(&AlwaysUnknown, &req, &mut session, &config, &database, &events);
        assert_eq!(resp.status, 400);
    }

    #[test]
    fn unrecognized_state_is_422() {
        let (config, database, events) = harness();
        let mut session = Session::new();
        let body = tlv::encode(&vec![tlv::Value::State(9)]);
        let req = req_with(body, Some(CONTENT_TYPE_TLV8));
        let resp = dispatch_tlv(&AlwaysUnknown, &req, &mut session, &config, &database, &events);
        assert_eq!(resp.status, 422);
    }

    #[test]
    fn recognized_state_with_handler_error_is_200_in_band() {
        let (config, database, events) = harness();
        let mut session = Session::new();
        let body = tlv::encode(&vec![tlv::Value::State(1)]);
        let req = req_with(body, Some(CONTENT_TYPE_TLV8));
        let resp = dispatch_tlv(&AlwaysUnknown, &req, &mut session, &config, &database, &events);
        assert_eq!(resp.status, 200);
        let decoded = tlv::decode(&resp.body).unwrap();
        assert_eq!(tlv::find(&decoded, tlv::Type::State), Some(&tlv::Value::State(2)));
        assert_eq!(tlv::find(&decoded, tlv::Type::Error), Some(&tlv::Value::Error(tlv::Error::Unknown as u64)));
    }
}

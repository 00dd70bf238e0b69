//! `GET /`: a liveness probe, not part of HAP itself (spec §6).

use crate::config::ConfigPtr;
use crate::db::DatabasePtr;
use crate::event::EventEmitterPtr;
use crate::session::Session;

use super::super::{Request, Response, CONTENT_TYPE_JSON};
use super::Handler;

pub struct Health;

impl Handler for Health {
    fn call(
        &self,
        _req: &Request,
        _session: &mut Session,
        _config: &ConfigPtr,
        _database: &DatabasePtr,
        _events: &EventEmitterPtr,
    ) -> Response {
        Response::new(200, CONTENT_TYPE_JSON, br#"{"foo":"bar"}"#.to_vec())
    }
}

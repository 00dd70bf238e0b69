//! HTTP/1.1 framing and routing (spec §4.4). Request target parsing,
//! content-type negotiation and the `(method, path) -> handler` map live
//! here; the actual socket plumbing (keep-alive, one-request-at-a-time
//! dispatch) is `transport::serve`, built on the same `hyper`/`tokio`
//! stack the upstream `hap` crate depends on.

pub mod handler;

use std::collections::HashMap;

use failure::Fail;
use route_recognizer::Router as RouteRecognizer;
use url::form_urlencoded;

pub const CONTENT_TYPE_TLV8: &str = "application/pairing+tlv8";
pub const CONTENT_TYPE_JSON: &str = "application/json";
pub const CONTENT_TYPE_TEXT: &str = "text/plain";

/// An inbound request, immutable for the duration of a handler call.
/// `Session` mutation happens through a separate `&mut` parameter so the
/// borrow checker enforces the "Request is immutable, Session is
/// mutable" split from spec §3.
pub struct Request {
    pub method: Method,
    pub path: String,
    pub query: HashMap<String, Vec<String>>,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Head,
    Other,
}

impl Method {
    fn from_hyper(m: &::hyper::Method) -> Method {
        match *m {
            ::hyper::Method::GET => Method::Get,
            ::hyper::Method::POST => Method::Post,
            ::hyper::Method::HEAD => Method::Head,
            _ => Method::Other,
        }
    }

    /// `HEAD` is routed as `GET`; the response body is dropped afterwards
    /// by the connection loop (spec §4.4).
    fn routing_key(self) -> Method {
        if self == Method::Head { Method::Get } else { self }
    }
}

impl Request {
    pub fn content_type(&self) -> Option<&str> {
        self.headers.get("content-type").map(|s| s.as_str())
    }

    pub fn parse_query(query_string: &str) -> HashMap<String, Vec<String>> {
        let mut map: HashMap<String, Vec<String>> = HashMap::new();
        for (key, value) in form_urlencoded::parse(query_string.as_bytes()) {
            map.entry(key.into_owned()).or_insert_with(Vec::new).push(value.into_owned());
        }
        map
    }
}

/// A response, immutable once constructed (spec §3).
pub struct Response {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, content_type: &'static str, body: Vec<u8>) -> Response {
        Response { status, content_type, body }
    }

    pub fn not_found() -> Response {
        Response::new(404, CONTENT_TYPE_TEXT, Vec::new())
    }

    pub fn internal_error() -> Response {
        Response::new(500, CONTENT_TYPE_TEXT, Vec::new())
    }

    pub fn timeout() -> Response {
        Response::new(408, CONTENT_TYPE_TEXT, Vec::new())
    }
}

/// Errors that abort dispatch before a handler's own (in-band) error
/// handling ever runs (spec §7).
#[derive(Debug, Fail)]
pub enum RequestError {
    #[fail(display = "Expected a TLV encoded request")]
    WrongContentType,
    #[fail(display = "malformed TLV8 request body")]
    MalformedTlv,
    #[fail(display = "unrecognized pairing state")]
    UnrecognizedState,
}

impl RequestError {
    pub fn into_response(self) -> Response {
        match self {
            RequestError::WrongContentType => {
                Response::new(400, CONTENT_TYPE_TEXT, b"Expected a TLV encoded request".to_vec())
            },
            RequestError::MalformedTlv => Response::new(400, CONTENT_TYPE_TEXT, Vec::new()),
            RequestError::UnrecognizedState => Response::new(422, CONTENT_TYPE_TEXT, Vec::new()),
        }
    }
}

/// Maps `(method, path)` to a handler. Built once at server construction
/// and shared read-only across connections (spec §4.4: "a small immutable
/// map"). Uses `route-recognizer` the same way the upstream `hap` crate
/// depends on it, even though today's two routes are both static paths.
pub struct Router {
    get: RouteRecognizer<usize>,
    post: RouteRecognizer<usize>,
    handlers: Vec<Box<dyn handler::Handler>>,
}

pub struct RouterBuilder {
    get: RouteRecognizer<usize>,
    post: RouteRecognizer<usize>,
    handlers: Vec<Box<dyn handler::Handler>>,
}

impl RouterBuilder {
    pub fn new() -> RouterBuilder {
        RouterBuilder { get: RouteRecognizer::new(), post: RouteRecognizer::new(), handlers: Vec::new() }
    }

    pub fn get(mut self, path: &str, handler: Box<dyn handler::Handler>) -> RouterBuilder {
        let idx = self.handlers.len();
        self.handlers.push(handler);
        self.get.add(path, idx);
        self
    }

    pub fn post(mut self, path: &str, handler: Box<dyn handler::Handler>) -> RouterBuilder {
        let idx = self.handlers.len();
        self.handlers.push(handler);
        self.post.add(path, idx);
        self
    }

    pub fn build(self) -> Router {
        Router { get: self.get, post: self.post, handlers: self.handlers }
    }
}

impl Router {
    pub fn route(&self, method: Method, path: &str) -> Option<&dyn handler::Handler> {
        let table = match method.routing_key() {
            Method::Get => &self.get,
            Method::Post => &self.post,
            _ => return None,
        };
        table.recognize(path).ok().map(|m| self.handlers[*m.handler].as_ref())
    }
}

pub(crate) fn method_from_hyper(m: &::hyper::Method) -> Method {
    Method::from_hyper(m)
}

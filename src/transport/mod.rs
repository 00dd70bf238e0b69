//! The connection loop (spec §4.5): accept TCP connections, own one
//! `Session` per connection, and serialize requests on it. Built on
//! `hyper` 0.12's low-level `Service`/`NewService` traits (the only
//! surface retrievable from the teacher — the concrete TCP/service glue
//! had to be reconstructed in that idiom) driven by a single-threaded
//! `tokio` runtime: spec §5 requires requests on one connection to be
//! handled strictly one at a time and never shares `Session` across
//! connections, so there is no need for a `Send` bound on per-connection
//! state, and `Rc<RefCell<Session>>` is the natural fit.

pub mod http;

use std::cell::RefCell;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::time::Duration;

use failure::Fail;
use futures::{future, Future, Stream};
use hyper::service::{NewService, Service};
use hyper::{Body, Request as HyperRequest, Response as HyperResponse, Server};
use log::{error, info};

use crate::config::ConfigPtr;
use crate::db::DatabasePtr;
use crate::event::EventEmitterPtr;
use crate::session::Session;

use self::http::{Request, Response, Router};

/// Failures the connection loop itself turns into a response, as opposed
/// to the in-band `(State, Error)` failures a `TlvHandler` produces
/// (spec §7).
#[derive(Debug, Fail)]
pub enum ServerError {
    #[fail(display = "handler panicked")]
    Internal,
    #[fail(display = "connection timed out")]
    Timeout,
}

impl ServerError {
    fn into_response(self) -> Response {
        match self {
            ServerError::Internal => Response::internal_error(),
            ServerError::Timeout => Response::timeout(),
        }
    }
}

/// Read-only state shared across every connection's `Service`.
struct Shared {
    router: Router,
    config: ConfigPtr,
    database: DatabasePtr,
    events: EventEmitterPtr,
    read_timeout: Duration,
}

struct ConnectionService {
    shared: Rc<Shared>,
    session: Rc<RefCell<Session>>,
}

impl Service for ConnectionService {
    type ReqBody = Body;
    type ResBody = Body;
    type Error = hyper::Error;
    type Future = Box<dyn Future<Item = HyperResponse<Body>, Error = hyper::Error>>;

    fn call(&mut self, req: HyperRequest<Body>) -> Self::Future {
        let shared = self.shared.clone();
        let session = self.session.clone();

        let method = http::method_from_hyper(req.method());
        let path = req.uri().path().to_string();
        let query = req.uri().query().map(Request::parse_query).unwrap_or_default();
        let headers = req
            .headers()
            .iter()
            .map(|(k, v)| (k.as_str().to_ascii_lowercase(), v.to_str().unwrap_or_default().to_string()))
            .collect();

        let handled = req.into_body().concat2().map(move |chunk| {
            let request = Request { method, path, query, headers, body: chunk.to_vec() };
            dispatch(&shared, &session, &request)
        });

        let timed = tokio::timer::Timeout::new(handled, self.shared.read_timeout).then(|result| match result {
            Ok(resp) => future::ok(to_hyper_response(resp)),
            Err(e) => {
                let resp = if e.is_elapsed() {
                    ServerError::Timeout.into_response()
                } else {
                    error!("connection error: {}", e);
                    ServerError::Internal.into_response()
                };
                future::ok(to_hyper_response(resp))
            },
        });

        Box::new(timed)
    }
}

/// Routes and runs one request, catching handler panics per spec §4.5
/// ("on handler exception, respond 500 with empty body").
fn dispatch(shared: &Rc<Shared>, session: &Rc<RefCell<Session>>, request: &Request) -> Response {
    let response = match shared.router.route(request.method, &request.path) {
        Some(handler) => {
            let mut session = session.borrow_mut();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                handler.call(request, &mut session, &shared.config, &shared.database, &shared.events)
            }));
            outcome.unwrap_or_else(|_| {
                error!("handler panicked while processing {:?} {}", request.method, request.path);
                ServerError::Internal.into_response()
            })
        },
        None => Response::not_found(),
    };

    info!("{:?} {} -> {}", request.method, request.path, response.status);
    response
}

fn to_hyper_response(resp: Response) -> HyperResponse<Body> {
    HyperResponse::builder()
        .status(resp.status)
        .header("content-type", resp.content_type)
        .header("content-length", resp.body.len().to_string())
        .body(Body::from(resp.body))
        .expect("status and headers built here are always valid")
}

struct MakeService {
    shared: Rc<Shared>,
}

impl NewService for MakeService {
    type ReqBody = Body;
    type ResBody = Body;
    type Error = hyper::Error;
    type Service = ConnectionService;
    type Future = future::FutureResult<Self::Service, Self::InitError>;
    type InitError = hyper::Error;

    fn new_service(&self) -> Self::Future {
        future::ok(ConnectionService { shared: self.shared.clone(), session: Rc::new(RefCell::new(Session::new())) })
    }
}

/// Binds and runs the server until the process is killed. Shutdown on a
/// signal is left to the caller (spec §4.5's graceful-shutdown wording
/// describes the listener's contract, not this binary's signal handling).
pub fn serve(
    config: ConfigPtr,
    database: DatabasePtr,
    events: EventEmitterPtr,
    router: Router,
) -> Result<(), failure::Error> {
    let (addr, read_timeout) = {
        let config = config.lock().expect("config lock poisoned");
        (config.bind_addr, config.read_timeout)
    };

    let shared = Rc::new(Shared { router, config, database, events, read_timeout });
    let make_service = MakeService { shared };

    let server = Server::bind(&addr)
        .serve(make_service)
        .map_err(|e| error!("server error: {}", e));

    info!("listening on {}", addr);

    let mut runtime = tokio::runtime::current_thread::Runtime::new()?;
    runtime.block_on(server).map_err(|_| failure::err_msg("connection loop failed"))
}

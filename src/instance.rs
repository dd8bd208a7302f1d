//! A single mock server instance.
//!
//! Each instance owns one listening socket and one script. Requests are
//! handled strictly one at a time: the script lock is held for the whole of
//! [`MockServerInstance::process`].
//!
//! Closing is cooperative. [`MockServerInstance::close`] sets the `closed`
//! flag first and then cancels the instance's token; the accept loop drops
//! its listener when it sees the cancellation and open connections finish
//! their in-flight response before going away. Socket errors seen after the
//! flag is set are expected and swallowed.

use crate::config::ServerConfig;
use crate::error::Error;
use crate::logging::LogHandle;
use crate::matcher::{RequestKey, Script};
use crate::response::MockResponse;
use bytes::Bytes;
use http::{Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioIo, TokioTimer};
use std::convert::Infallible;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Methods routed into the script; anything else gets a 501.
const SUPPORTED_METHODS: [&str; 5] = ["GET", "POST", "PUT", "DELETE", "HEAD"];

/// One independently listening mock server.
#[derive(Debug)]
pub struct MockServerInstance {
    name: String,
    addr: SocketAddr,
    script: Mutex<Script>,
    closed: AtomicBool,
    shutdown: CancellationToken,
    log: LogHandle,
}

impl MockServerInstance {
    /// Bind the configured address. The script is copied from `config`.
    pub async fn bind(
        config: &ServerConfig,
        log: LogHandle,
    ) -> Result<(Arc<Self>, TcpListener), Error> {
        let bind_addr = config.bind_addr();
        let bind_err = |source: io::Error| Error::Bind {
            server: config.name.clone(),
            addr: bind_addr.clone(),
            source,
        };

        let listener = TcpListener::bind(bind_addr.as_str()).await.map_err(bind_err)?;
        let addr = listener.local_addr().map_err(bind_err)?;

        if !config.schema.eq_ignore_ascii_case("http") {
            warn!(
                server = %config.name,
                schema = %config.schema,
                "Only plain http is served, ignoring configured schema"
            );
        }

        let instance = Self {
            name: config.name.clone(),
            addr,
            script: Mutex::new(Script::new(config.requests.clone(), config.mode())),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
            log,
        };
        Ok((Arc::new(instance), listener))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The address actually bound (resolves port 0).
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of script entries not yet consumed.
    pub async fn remaining_requests(&self) -> usize {
        self.script.lock().await.remaining().len()
    }

    /// Close the instance. Only the first call has any effect; returns
    /// whether this call did the closing.
    pub fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.log.log(format!("'{}': Closing socket.", self.name));
        self.shutdown.cancel();
        self.log.log(format!("'{}': Terminated.", self.name));
        true
    }

    /// Accept loop. Returns once the instance is closed, or with an error
    /// if accepting fails while it is still open.
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> Result<(), Error> {
        self.log.log(format!(
            "'{}': Server started. Listening on {}.",
            self.name, self.addr
        ));

        loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    let instance = Arc::clone(&self);
                    tokio::spawn(instance.serve_connection(stream, peer));
                }
                Err(e) if self.is_closed() => {
                    debug!(server = %self.name, error = %e, "Accept failed after close");
                    break;
                }
                Err(e) if is_transient_accept_error(&e) => {
                    debug!(server = %self.name, error = %e, "Transient accept error");
                }
                Err(source) => {
                    error!(server = %self.name, error = %source, "Accept failed");
                    return Err(Error::Accept {
                        server: self.name.clone(),
                        addr: self.addr,
                        source,
                    });
                }
            }
        }

        drop(listener);
        debug!(server = %self.name, "Listener closed");
        Ok(())
    }

    async fn serve_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let instance = Arc::clone(&self);
        let service = service_fn(move |req: Request<Incoming>| {
            let instance = Arc::clone(&instance);
            async move { Ok::<_, Infallible>(instance.handle(req).await) }
        });

        let conn = http1::Builder::new()
            .timer(TokioTimer::new())
            .keep_alive(true)
            .serve_connection(TokioIo::new(stream), service);
        tokio::pin!(conn);

        let result = tokio::select! {
            result = conn.as_mut() => result,
            _ = self.shutdown.cancelled() => {
                // Let an in-flight response finish, then close.
                conn.as_mut().graceful_shutdown();
                conn.as_mut().await
            }
        };

        if let Err(e) = result {
            if self.is_closed() {
                debug!(server = %self.name, %peer, error = %e, "Connection ended during close");
            } else {
                debug!(server = %self.name, %peer, error = %e, "Connection error");
            }
        }
    }

    async fn handle(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let method = req.method().as_str().to_string();
        // The request target exactly as received, query string included.
        let target = req.uri().to_string();

        // Bodies are read to keep the connection usable, never matched.
        let body_len = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes().len(),
            Err(e) => {
                debug!(server = %self.name, error = %e, "Failed to read request body");
                0
            }
        };
        debug!(server = %self.name, %method, %target, body_len, "Request received");

        let response = self.process(&method, &target).await;
        response.into_http().unwrap_or_else(|e| {
            error!(server = %self.name, error = %e, "Failed to build response");
            let mut fallback = Response::new(Full::new(Bytes::from_static(
                b"mock-server: invalid scripted response\n",
            )));
            *fallback.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
            fallback
        })
    }

    /// Decide the response to one request and apply the lifecycle
    /// transitions it causes.
    pub async fn process(&self, method: &str, target: &str) -> MockResponse {
        let key = RequestKey::new(method, target);
        let mut script = self.script.lock().await;

        if key == RequestKey::control(&self.name) {
            self.log.log(format!("'{}': [{}] - Close requested.", self.name, key));
            self.close();
            return MockResponse::empty(200).with_connection_close();
        }

        if !SUPPORTED_METHODS.contains(&key.method()) {
            let msg = format!("'{}': [{}] Unsupported method!", self.name, key);
            self.log.log(format!("*** Error: {}", msg));
            return MockResponse::diagnostic(501, &msg);
        }

        match script.take(&key) {
            Err(e) => {
                let msg = format!("'{}': {}", self.name, e);
                self.log.log(format!("*** Error: {}", msg));
                MockResponse::diagnostic(400, &msg)
            }
            Ok(matched) => {
                let response = MockResponse::from_spec(&matched.response);
                self.log.log(format!(
                    "'{}': [{}] - Resp: {} ({})",
                    self.name,
                    key,
                    response.status,
                    response.body.len()
                ));
                if matched.exhausted {
                    self.log.log(format!("'{}': All requests processed.", self.name));
                    self.close();
                    response.with_connection_close()
                } else {
                    response
                }
            }
        }
    }
}

fn is_transient_accept_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::Interrupted
    )
}

//! Response construction.
//!
//! Turns a scripted [`ResponseSpec`] (or a diagnostic) into the response
//! that is written back to the client.

use crate::config::{split_header, ResponseSpec};
use bytes::Bytes;
use http::header::{CONNECTION, SERVER};
use http::Response;
use http_body_util::Full;

/// Server identification sent when the script does not override it.
pub const DEFAULT_SERVER: &str = "mock-server";

/// A response ready to be sent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockResponse {
    pub status: u16,
    /// Value of the `Server` header
    pub server: String,
    /// Headers other than `Server`, in script order
    pub headers: Vec<(String, String)>,
    pub body: String,
    /// Ask the client not to reuse the connection.
    pub close_connection: bool,
}

impl MockResponse {
    /// Build the response for a matched script entry.
    ///
    /// A `server` header (any case) replaces the server identification
    /// instead of being sent as a normal header.
    pub fn from_spec(spec: &ResponseSpec) -> Self {
        let mut server = DEFAULT_SERVER.to_string();
        let mut headers = Vec::with_capacity(spec.headers.len());
        let mut server_overridden = false;

        for (name, value) in spec.headers.iter().filter_map(|h| split_header(h)) {
            if name.eq_ignore_ascii_case("server") {
                if !server_overridden {
                    server = value.to_string();
                    server_overridden = true;
                }
            } else {
                headers.push((name.to_string(), value.to_string()));
            }
        }

        Self {
            status: spec.status,
            server,
            headers,
            body: spec.body.join("\n"),
            close_connection: false,
        }
    }

    /// Status only, empty body.
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            server: DEFAULT_SERVER.to_string(),
            headers: Vec::new(),
            body: String::new(),
            close_connection: false,
        }
    }

    /// A short diagnostic: the message plus a newline as body.
    pub fn diagnostic(status: u16, message: &str) -> Self {
        Self {
            body: format!("{}\n", message),
            ..Self::empty(status)
        }
    }

    pub fn with_connection_close(mut self) -> Self {
        self.close_connection = true;
        self
    }

    /// Convert into an HTTP response. Content-Length is set from the body.
    pub fn into_http(self) -> Result<Response<Full<Bytes>>, http::Error> {
        let mut builder = Response::builder()
            .status(self.status)
            .header(SERVER, self.server.as_str());
        for (name, value) in &self.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if self.close_connection {
            builder = builder.header(CONNECTION, "close");
        }
        builder.body(Full::new(Bytes::from(self.body)))
    }
}

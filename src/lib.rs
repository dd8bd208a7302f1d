//! Mock Server
//!
//! A scripted HTTP test double. Each configured server listens on its own
//! port and answers the requests its script expects with canned responses,
//! so client code can be tested without a real backend.
//!
//! # Features
//!
//! - **Multiple Servers**: One process hosts any number of independent servers
//! - **Ordered Scripts**: Requests must arrive in sequence; each match is consumed
//!   and the server closes itself once the script is done
//! - **Unordered Scripts**: Any scripted request matches, any number of times
//! - **Control Command**: `DELETE <server-name>` closes a server on demand
//! - **Serialized Log**: One writer appends every server's log lines to a file
//!
//! # Example Configuration
//!
//! ```json
//! {
//!   "logfile": "mock-server.log",
//!   "servers": [{
//!     "name": "s1",
//!     "port": 9001,
//!     "requests_in_order": true,
//!     "requests": [{
//!       "request": {"req": "GET /a"},
//!       "response": {"status": 200, "headers": ["Content-Type: text/plain"], "body": ["ok"]}
//!     }]
//!   }]
//! }
//! ```

pub mod config;
pub mod error;
pub mod instance;
pub mod logging;
pub mod matcher;
pub mod response;
pub mod service;
pub mod signals;
pub mod supervisor;

pub use config::ServiceConfig;
pub use error::Error;
pub use instance::MockServerInstance;
pub use supervisor::{Outcome, Supervisor};

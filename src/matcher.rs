//! Request matching logic.
//!
//! Matches incoming requests against an instance's script. Matching is on
//! the normalized `METHOD PATH` key only; headers and bodies never take part.

use crate::config::{RequestSpec, ResponseSpec};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Normalized `METHOD PATH` key of a request.
///
/// The method is trimmed and upper-cased, the path is trimmed. The path is
/// otherwise the literal request target: no URL decoding, the query string
/// stays part of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RequestLineDef", into = "RequestLineDef")]
pub struct RequestKey {
    method: String,
    path: String,
}

impl RequestKey {
    pub fn new(method: &str, path: &str) -> Self {
        Self {
            method: method.trim().to_uppercase(),
            path: path.trim().to_string(),
        }
    }

    /// Parse a `"METHOD PATH"` request line.
    pub fn parse(line: &str) -> Option<Self> {
        let (method, path) = line.trim().split_once(char::is_whitespace)?;
        let path = path.trim();
        if method.is_empty() || path.is_empty() {
            return None;
        }
        Some(Self::new(method, path))
    }

    /// The reserved `DELETE <name>` key that closes the named instance.
    pub fn control(server_name: &str) -> Self {
        Self::new("DELETE", server_name)
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Both spellings of a scripted request accepted in config files.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RequestLineDef {
    Line { req: String },
    Parts { method: String, path: String },
}

impl TryFrom<RequestLineDef> for RequestKey {
    type Error = String;

    fn try_from(def: RequestLineDef) -> Result<Self, Self::Error> {
        match def {
            RequestLineDef::Line { req } => RequestKey::parse(&req)
                .ok_or_else(|| format!("request line '{}' needs a method and a path", req)),
            RequestLineDef::Parts { method, path } => {
                if method.trim().is_empty() || path.trim().is_empty() {
                    return Err("request needs a method and a path".to_string());
                }
                Ok(RequestKey::new(&method, &path))
            }
        }
    }
}

impl From<RequestKey> for RequestLineDef {
    fn from(key: RequestKey) -> Self {
        RequestLineDef::Line {
            req: key.to_string(),
        }
    }
}

/// Matching discipline of an instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchMode {
    /// Only the head of the script may match; a match consumes it.
    Ordered,
    /// Any entry may match, any number of times; nothing is consumed.
    Unordered,
}

impl MatchMode {
    pub fn from_in_order(requests_in_order: bool) -> Self {
        if requests_in_order {
            MatchMode::Ordered
        } else {
            MatchMode::Unordered
        }
    }
}

/// A request that the script does not accept right now.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MatchError {
    #[error("[{0}] Not the expected next request!")]
    UnexpectedNext(RequestKey),

    #[error("[{0}] Not an acceptable request!")]
    NotAcceptable(RequestKey),
}

/// Find the script entry answering `key`.
///
/// Ordered mode only ever looks at index 0. Unordered mode returns the first
/// entry in script order.
pub fn find_match(
    key: &RequestKey,
    script: &[RequestSpec],
    mode: MatchMode,
) -> Result<usize, MatchError> {
    match mode {
        MatchMode::Ordered => match script.first() {
            Some(head) if head.request == *key => Ok(0),
            _ => Err(MatchError::UnexpectedNext(key.clone())),
        },
        MatchMode::Unordered => script
            .iter()
            .position(|spec| spec.request == *key)
            .ok_or_else(|| MatchError::NotAcceptable(key.clone())),
    }
}

/// Outcome of a successful match against a [`Script`].
#[derive(Debug, Clone)]
pub struct Matched {
    pub response: ResponseSpec,
    /// The match consumed the last remaining entry.
    pub exhausted: bool,
}

/// The remaining script of one instance.
#[derive(Debug, Clone)]
pub struct Script {
    entries: Vec<RequestSpec>,
    mode: MatchMode,
}

impl Script {
    pub fn new(entries: Vec<RequestSpec>, mode: MatchMode) -> Self {
        Self { entries, mode }
    }

    pub fn remaining(&self) -> &[RequestSpec] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Match `key` and apply the resulting script mutation.
    ///
    /// A failed match leaves the script untouched.
    pub fn take(&mut self, key: &RequestKey) -> Result<Matched, MatchError> {
        let index = find_match(key, &self.entries, self.mode)?;
        match self.mode {
            MatchMode::Ordered => {
                let spec = self.entries.remove(index);
                Ok(Matched {
                    response: spec.response,
                    exhausted: self.entries.is_empty(),
                })
            }
            MatchMode::Unordered => Ok(Matched {
                response: self.entries[index].response.clone(),
                exhausted: false,
            }),
        }
    }
}

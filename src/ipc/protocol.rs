//! Legacy unframed request protocol.
//!
//! A request is whatever a single read returns, up to the receive buffer
//! size. There is no delimiter or length prefix. The reply is a fixed
//! acknowledgment string without a terminator.

use crate::defaults;

/// A decoded request payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Stop accepting connections and exit. No reply is sent.
    Quit,
    /// Run the batch named by this feature archive specifier.
    Extract { specifier: String },
}

impl Request {
    /// Decodes a raw payload. Only the exact bytes `quit` shut the server down.
    pub fn parse(payload: &[u8]) -> Self {
        if payload == defaults::QUIT_SENTINEL.as_bytes() {
            return Request::Quit;
        }
        Request::Extract {
            specifier: String::from_utf8_lossy(payload).into_owned(),
        }
    }
}

/// Result of handling an extraction request.
///
/// The wire reply is the same acknowledgment either way; `success` is only
/// logged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    Completed { success: bool },
}

impl Response {
    pub fn success(&self) -> bool {
        match self {
            Response::Completed { success } => *success,
        }
    }
}

//! Reply status headers - the wire contract shared with callers.

/// Header carrying the request outcome.
pub const STATUS_HEADER: &str = "status";

/// Header carrying a quote-escaped failure message.
pub const ERROR_HEADER: &str = "error";

/// The request was handled (or served from cache).
pub const SUCCESS: &str = "SUCCESS";

/// The payload did not decode as the request type.
pub const FAIL_DECODE: &str = "FAIL:DECODE";

/// The handler returned an error.
pub const FAIL_HANDLE: &str = "FAIL:HANDLE";

/// The response failed to encode.
pub const FAIL_ENCODE: &str = "FAIL:ENCODE";

/// A handler fault was recovered at the task boundary.
pub const FAIL_RECOVERED: &str = "FAIL:RECOVERED";

/// Reserved: request hashing failed. Hashing an in-memory slice cannot
/// fail here, so this status is kept for wire parity only.
pub const FAIL_REQUEST_HASH: &str = "FAIL:REQUEST:HASH";

/// Escape a failure message for the `error` header.
#[must_use]
pub fn escape_quotes(message: &str) -> String {
    message.replace('\\', "\\\\").replace('"', "\\\"")
}

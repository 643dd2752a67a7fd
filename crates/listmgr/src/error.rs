//! Sum of error kinds (spec §7, §9): one small taxonomy with a single
//! translation point to an SMTP status code at the LMTP boundary, instead
//! of propagating raw DB/I/O errors or SMTP codes deep into the call
//! stack the way the source material does.

use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// Bad address syntax, missing required fields, loop detection. Always
    /// a 5xx; the transaction is aborted; never retried by the system.
    ProtocolViolation(String),
    /// DB unavailable, sendmail fork/exec failure. A 4xx so the submitting
    /// MTA retries.
    Transient(String),
    /// Reject action, non-member sending "leave". Terminal 5xx, never
    /// logged at error severity.
    Policy(String),
    /// Checkback validation failure, collapsed from signature/expiry
    /// distinctions into one opaque kind.
    Link,
    /// Anything else: logged at error severity, surfaced as a 451/554
    /// depending on context.
    Internal(String),
    /// A specific reply code the caller already knows (510/513/541/550/554
    /// distinctions spec §6 draws that `default_smtp_code`'s generic
    /// kind-level mapping does not), carried verbatim to the LMTP boundary.
    Coded(u16, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
            Error::Transient(msg) => write!(f, "transient error: {msg}"),
            Error::Policy(msg) => write!(f, "policy rejection: {msg}"),
            Error::Link => write!(f, "invalid or expired link"),
            Error::Internal(msg) => write!(f, "internal error: {msg}"),
            Error::Coded(code, msg) => write!(f, "{code} {msg}"),
        }
    }
}
impl std::error::Error for Error {}

impl From<store::StoreError> for Error {
    fn from(e: store::StoreError) -> Self {
        Error::Transient(e.to_string())
    }
}

impl From<mta::SinkError> for Error {
    fn from(e: mta::SinkError) -> Self {
        Error::Transient(e.to_string())
    }
}

impl From<checkback::ErrLink> for Error {
    fn from(_: checkback::ErrLink) -> Self {
        Error::Link
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Transient(e.to_string())
    }
}

/// A single SMTP status + message, assigned at the LMTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmtpCode(pub u16);

/// One reply code per distinct rejection reason named in spec §6; callers
/// that need a specific code (510/513/541/550/554) construct it directly
/// instead of going through this generic mapping, which only covers the
/// kind-level defaults (442/451/554).
pub fn default_smtp_code(err: &Error) -> (SmtpCode, String) {
    match err {
        Error::ProtocolViolation(msg) => (SmtpCode(554), msg.clone()),
        Error::Transient(msg) => (SmtpCode(451), msg.clone()),
        Error::Policy(msg) => (SmtpCode(550), msg.clone()),
        Error::Link => (SmtpCode(451), "invalid or expired link".to_string()),
        Error::Internal(msg) => (SmtpCode(451), msg.clone()),
        Error::Coded(code, msg) => (SmtpCode(*code), msg.clone()),
    }
}

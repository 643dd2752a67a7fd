pub mod classify;
pub mod error;
pub mod forward;
pub mod session;
pub mod spool;
pub mod templates;

pub use error::{default_smtp_code, Error, SmtpCode};
pub use session::{run_session, SessionContext};
pub use spool::Spool;

//! MTA sink (C5): hands a finished, serialized message to the outbound
//! transport. The production path shells out to a sendmail-compatible
//! binary exactly the way the teacher's outbound DANE/DNSSEC code calls
//! into external processes for verification — one `Command`, flags fixed,
//! exit status is the only signal.

use std::{
    io::Write,
    process::{Command, Stdio},
};

pub trait Sink: Send + Sync {
    /// Sends one message. `header` and `body` are concatenated verbatim
    /// (caller is responsible for the blank line between them).
    fn send(&self, envelope_from: &str, envelope_to: &[String], header: &[u8], body: &[u8]) -> Result<(), SinkError>;
}

#[derive(Debug)]
pub enum SinkError {
    Spawn(std::io::Error),
    Write(std::io::Error),
    NonZeroExit(Option<i32>),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SinkError::Spawn(e) => write!(f, "failed to spawn sendmail: {e}"),
            SinkError::Write(e) => write!(f, "failed to write to sendmail stdin: {e}"),
            SinkError::NonZeroExit(code) => write!(f, "sendmail exited with status {code:?}"),
        }
    }
}
impl std::error::Error for SinkError {}

/// Invokes `/usr/sbin/sendmail -i -f <envFrom> -- <rcpts…>`, piping the
/// serialized message to stdin.
pub struct Sendmail {
    binary: String,
}

impl Default for Sendmail {
    fn default() -> Self {
        Sendmail {
            binary: "/usr/sbin/sendmail".to_string(),
        }
    }
}

impl Sendmail {
    pub fn new(binary: impl Into<String>) -> Self {
        Sendmail { binary: binary.into() }
    }
}

impl Sink for Sendmail {
    fn send(&self, envelope_from: &str, envelope_to: &[String], header: &[u8], body: &[u8]) -> Result<(), SinkError> {
        let mut command = Command::new(&self.binary);
        command
            .arg("-i")
            .arg("-f")
            .arg(envelope_from)
            .arg("--")
            .args(envelope_to)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null());

        let mut child = command.spawn().map_err(SinkError::Spawn)?;
        {
            let stdin = child.stdin.as_mut().expect("stdin was piped");
            stdin.write_all(header).map_err(SinkError::Write)?;
            stdin.write_all(body).map_err(SinkError::Write)?;
        }
        let status = child.wait().map_err(SinkError::Spawn)?;
        if !status.success() {
            trc::Event::new(trc::EventType::ForwardFailed)
                .with("envelope_from", envelope_from.to_string())
                .at(trc::Level::Warn)
                .send();
            return Err(SinkError::NonZeroExit(status.code()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub envelope_from: String,
    pub envelope_to: Vec<String>,
    pub header: Vec<u8>,
    pub body: Vec<u8>,
}

/// In-memory sink for tests: captures every call rather than shelling out.
#[derive(Default)]
pub struct RecordingSink {
    calls: parking_lot::Mutex<Vec<RecordedCall>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        RecordingSink::default()
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().clone()
    }
}

impl Sink for RecordingSink {
    fn send(&self, envelope_from: &str, envelope_to: &[String], header: &[u8], body: &[u8]) -> Result<(), SinkError> {
        self.calls.lock().push(RecordedCall {
            envelope_from: envelope_from.to_string(),
            envelope_to: envelope_to.to_vec(),
            header: header.to_vec(),
            body: body.to_vec(),
        });
        Ok(())
    }
}

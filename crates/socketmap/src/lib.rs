//! Socketmap server (C11): speaks Postfix's socketmap protocol over a
//! Unix stream socket, translating `IsList` lookups into
//! `OK lmtp:unix:<path>` / `NOTFOUND ` / `TEMP ...` netstring replies. The
//! accept-loop-plus-registry shape mirrors the teacher's `ServerInstance`
//! pattern (one listener, a registry of live connections, a watch channel
//! for graceful shutdown) without pulling in the teacher's generic
//! multi-protocol listener abstraction — this server only ever speaks one
//! protocol on one socket kind.

use std::{sync::Arc, time::Duration};

use common::Address;
use parking_lot::Mutex;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{UnixListener, UnixStream},
    sync::watch,
    time::timeout,
};

pub const READ_DEADLINE: Duration = Duration::from_secs(10);
pub const MAX_READ_BYTES: usize = 500;

#[derive(Debug)]
pub enum LookupError {
    Database,
}

pub trait ListLookup: Send + Sync {
    fn is_list(&self, addr: &Address) -> Result<bool, LookupError>;
}

pub struct SocketmapServer<L> {
    lookup: Arc<L>,
    lmtp_socket_path: String,
    connections: Arc<Mutex<Vec<tokio::task::JoinHandle<()>>>>,
}

impl<L: ListLookup + 'static> SocketmapServer<L> {
    pub fn new(lookup: Arc<L>, lmtp_socket_path: impl Into<String>) -> Self {
        SocketmapServer {
            lookup,
            lmtp_socket_path: lmtp_socket_path.into(),
            connections: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Accepts connections until `shutdown` fires, then waits for every
    /// in-flight connection task to finish.
    pub async fn serve(&self, listener: UnixListener, mut shutdown: watch::Receiver<bool>) -> std::io::Result<()> {
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, _) = accepted?;
                    let lookup = self.lookup.clone();
                    let lmtp_path = self.lmtp_socket_path.clone();
                    let handle = tokio::spawn(async move {
                        if let Err(err) = handle_connection(stream, lookup, lmtp_path).await {
                            trc::Event::new(trc::EventType::SocketmapQuery)
                                .with("error", err.to_string())
                                .at(trc::Level::Warn)
                                .send();
                        }
                    });
                    self.connections.lock().push(handle);
                    self.connections.lock().retain(|h| !h.is_finished());
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        let handles: Vec<_> = self.connections.lock().drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
        Ok(())
    }
}

async fn handle_connection<L: ListLookup>(mut stream: UnixStream, lookup: Arc<L>, lmtp_socket_path: String) -> std::io::Result<()> {
    let mut buf = vec![0u8; MAX_READ_BYTES];
    let mut pending: Vec<u8> = Vec::new();

    loop {
        let read_result = timeout(READ_DEADLINE, stream.read(&mut buf)).await;
        let n = match read_result {
            Ok(Ok(0)) => return Ok(()),
            Ok(Ok(n)) => n,
            Ok(Err(e)) => return Err(e),
            Err(_) => return Ok(()),
        };
        pending.extend_from_slice(&buf[..n]);

        match utils::netstring::decode(&pending) {
            Ok((payload, consumed)) => {
                let response = dispatch(payload, lookup.as_ref(), &lmtp_socket_path);
                stream.write_all(&utils::netstring::encode(response.as_bytes())).await?;
                pending.drain(..consumed);
            }
            Err(utils::netstring::DecodeError::Incomplete) => continue,
            Err(_) => {
                stream.write_all(&utils::netstring::encode(b"PERM malformed netstring")).await?;
                return Ok(());
            }
        }
    }
}

fn dispatch<L: ListLookup>(payload: &[u8], lookup: &L, lmtp_socket_path: &str) -> String {
    let text = String::from_utf8_lossy(payload);
    let key = match text.split_once(' ') {
        Some((_map_name, key)) => key,
        None => return "PERM malformed request".to_string(),
    };

    if key == "*" {
        return "NOTFOUND ".to_string();
    }

    let addr = match common::address::parse(key) {
        Ok(addr) => addr,
        Err(_) => return "NOTFOUND ".to_string(),
    };

    match lookup.is_list(&addr) {
        Ok(true) => format!("OK lmtp:unix:{lmtp_socket_path}"),
        Ok(false) => "NOTFOUND ".to_string(),
        Err(LookupError::Database) => "TEMP database error".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedLookup {
        known: Vec<String>,
        fail: bool,
    }

    impl ListLookup for FixedLookup {
        fn is_list(&self, addr: &Address) -> Result<bool, LookupError> {
            if self.fail {
                return Err(LookupError::Database);
            }
            Ok(self.known.contains(&addr.addr_spec()))
        }
    }

    #[test]
    fn star_key_is_notfound() {
        let lookup = FixedLookup { known: vec![], fail: false };
        assert_eq!(dispatch(b"map *", &lookup, "/run/lmtp.sock"), "NOTFOUND ");
    }

    #[test]
    fn unparseable_key_is_notfound_not_error() {
        let lookup = FixedLookup { known: vec![], fail: false };
        assert_eq!(dispatch(b"map not-an-address", &lookup, "/run/lmtp.sock"), "NOTFOUND ");
    }

    #[test]
    fn known_list_returns_ok_with_lmtp_path() {
        let lookup = FixedLookup {
            known: vec!["a@example.com".to_string()],
            fail: false,
        };
        assert_eq!(
            dispatch(b"map a@example.com", &lookup, "/run/lmtp.sock"),
            "OK lmtp:unix:/run/lmtp.sock"
        );
    }

    #[test]
    fn db_error_is_temp() {
        let lookup = FixedLookup { known: vec![], fail: true };
        assert_eq!(dispatch(b"map a@example.com", &lookup, "/run/lmtp.sock"), "TEMP database error");
    }
}

use std::sync::Arc;

use listmgr::SessionContext;
use mta::RecordingSink;
use store::SqliteStore;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};

/// Opens a `SqliteStore` backed by a uniquely named file under the OS temp
/// directory; the file is never cleaned up, matching the teacher's own
/// `lookup_sql` test which leans on the OS to reclaim scratch db files.
pub fn temp_store() -> Arc<SqliteStore> {
    let path = std::env::temp_dir().join(format!("listmgr-test-{}-{}.sqlite3", std::process::id(), rand::random::<u64>()));
    Arc::new(SqliteStore::open(&path).expect("open temp store"))
}

pub fn temp_spool() -> Arc<listmgr::Spool> {
    let dir = std::env::temp_dir().join(format!("listmgr-test-spool-{}-{}", std::process::id(), rand::random::<u64>()));
    Arc::new(listmgr::Spool::new(dir))
}

/// Builds a `SessionContext` around a fresh temp store, a fresh spool
/// directory, a `RecordingSink`, and a fresh rate limiter, returning the
/// context plus a handle to the sink so tests can inspect outbound calls.
pub fn harness() -> (Arc<SessionContext>, Arc<RecordingSink>, Arc<SqliteStore>) {
    let store = temp_store();
    let sink = Arc::new(RecordingSink::new());
    let ctx = Arc::new(SessionContext {
        store: store.clone(),
        sink: sink.clone() as Arc<dyn mta::Sink>,
        spool: temp_spool(),
        rate_limiter: Arc::new(checkback::RateLimiter::new()),
        web_url: "https://list.example.com".to_string(),
    });
    (ctx, sink, store)
}

/// Drives one LMTP connection over an in-memory duplex pipe, the
/// production `run_session` on one end and a scripted client on the other.
pub struct Conversation {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Conversation {
    pub fn start(ctx: Arc<SessionContext>) -> Self {
        let (client, server) = tokio::io::duplex(1 << 20);
        tokio::spawn(async move {
            let _ = listmgr::run_session(server, &ctx).await;
        });
        let (read_half, write_half) = tokio::io::split(client);
        Conversation {
            reader: BufReader::new(read_half),
            writer: write_half,
        }
    }

    pub async fn greeting(&mut self) -> String {
        self.read_line().await
    }

    async fn read_line(&mut self) -> String {
        let mut line = String::new();
        self.reader.read_line(&mut line).await.expect("read LMTP response");
        line.trim_end().to_string()
    }

    /// Sends one command line and returns the single-line reply.
    pub async fn command(&mut self, line: &str) -> String {
        self.writer.write_all(line.as_bytes()).await.unwrap();
        self.writer.write_all(b"\r\n").await.unwrap();
        self.read_line().await
    }

    /// Sends `raw` as the DATA payload (dot-stuffed and terminated for the
    /// caller) and returns the final per-transaction response line.
    pub async fn data(&mut self, raw: &[u8]) -> String {
        let go_ahead = self.command("DATA").await;
        assert!(go_ahead.starts_with("354"), "unexpected DATA response: {go_ahead}");
        self.writer.write_all(&dot_stuff(raw)).await.unwrap();
        self.read_line().await
    }
}

fn dot_stuff(raw: &[u8]) -> Vec<u8> {
    let mut lines: Vec<&[u8]> = raw.split(|&b| b == b'\n').collect();
    if raw.ends_with(b"\n") {
        lines.pop();
    }
    let mut out = Vec::new();
    for line in lines {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.starts_with(b".") {
            out.push(b'.');
        }
        out.extend_from_slice(line);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b".\r\n");
    out
}

/// Runs one full LHLO/MAIL FROM/RCPT TO.../DATA/QUIT transaction and
/// returns `(rcpt_responses, data_response)`.
pub async fn deliver(ctx: Arc<SessionContext>, mail_from: &str, rcpt_to: &[&str], raw_message: &[u8]) -> (Vec<String>, String) {
    let mut convo = Conversation::start(ctx);
    let greeting = convo.greeting().await;
    assert!(greeting.starts_with("220"), "unexpected greeting: {greeting}");
    assert!(convo.command("LHLO client.example.com").await.starts_with("250"));
    assert!(convo.command(&format!("MAIL FROM:<{mail_from}>")).await.starts_with("250"));

    let mut rcpt_responses = Vec::new();
    for rcpt in rcpt_to {
        rcpt_responses.push(convo.command(&format!("RCPT TO:<{rcpt}>")).await);
    }

    let data_response = convo.data(raw_message).await;
    let _ = convo.command("QUIT").await;
    (rcpt_responses, data_response)
}

//! Process bootstrap: wires config, store, sink, spool, and rate limiter
//! into the two listeners (LMTP, socketmap) and runs them until a shutdown
//! signal fires, mirroring the teacher's `ServerInstance`/accept-loop shape
//! used throughout `smtp::core`.

use std::{path::PathBuf, sync::Arc};

use common::Address;
use listmgr::{session, SessionContext};
use socketmap::{ListLookup, LookupError, SocketmapServer};
use store::SqliteStore;
use tokio::{net::UnixListener, sync::watch, task::JoinHandle};
use utils::{limiter::ConcurrencyLimiter, Config};

pub struct Settings {
    pub db_path: PathBuf,
    pub spool_root: PathBuf,
    pub lmtp_socket: PathBuf,
    pub socketmap_socket: PathBuf,
    pub web_url: String,
    pub gdpr_log_path: PathBuf,
    pub lmtp_max_concurrency: u64,
}

impl Settings {
    pub fn from_config(config: &Config) -> Self {
        Settings {
            db_path: config.value("store.path").unwrap_or("/var/lib/listmgr/listmgr.sqlite3").into(),
            spool_root: config.value("spool.root").unwrap_or("/var/spool/listmgr").into(),
            lmtp_socket: config.value("lmtp.socket").unwrap_or("/run/listmgr/lmtp.sock").into(),
            socketmap_socket: config.value("socketmap.socket").unwrap_or("/run/listmgr/socketmap.sock").into(),
            web_url: config.value("web.url").unwrap_or("https://lists.example.com").to_string(),
            gdpr_log_path: config.value("gdpr.log_path").unwrap_or("/var/lib/listmgr/gdpr.log").into(),
            lmtp_max_concurrency: config.property_or("lmtp.max-concurrency", 256u64),
        }
    }
}

struct StoreListLookup {
    store: Arc<SqliteStore>,
}

impl ListLookup for StoreListLookup {
    fn is_list(&self, addr: &Address) -> Result<bool, LookupError> {
        self.store.is_list(addr).map_err(|_| LookupError::Database)
    }
}

/// Binds both listeners and runs them to completion, returning once a
/// shutdown has been requested and every in-flight connection has drained.
pub async fn serve(config: Config) -> std::io::Result<()> {
    trc::install(trc::JsonLineSubscriber::stderr());

    let settings = Settings::from_config(&config);
    let store = Arc::new(SqliteStore::open(&settings.db_path).map_err(to_io_error)?);
    std::fs::create_dir_all(&settings.spool_root)?;
    if let Some(parent) = settings.lmtp_socket.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if let Some(parent) = settings.socketmap_socket.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let _ = std::fs::remove_file(&settings.lmtp_socket);
    let _ = std::fs::remove_file(&settings.socketmap_socket);

    let ctx = Arc::new(SessionContext {
        store: store.clone(),
        sink: Arc::new(mta::Sendmail::default()),
        spool: Arc::new(listmgr::Spool::new(settings.spool_root.clone())),
        rate_limiter: Arc::new(checkback::RateLimiter::new()),
        web_url: settings.web_url.clone(),
    });

    let lmtp_listener = UnixListener::bind(&settings.lmtp_socket)?;
    let socketmap_listener = UnixListener::bind(&settings.socketmap_socket)?;
    let socketmap_server = SocketmapServer::new(Arc::new(StoreListLookup { store: store.clone() }), settings.lmtp_socket.to_string_lossy().to_string());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let lmtp_limiter = ConcurrencyLimiter::new(settings.lmtp_max_concurrency);
    let lmtp_task = tokio::spawn(run_lmtp(lmtp_listener, ctx, lmtp_limiter, shutdown_rx.clone()));
    let socketmap_rx = shutdown_rx.clone();
    let socketmap_task: JoinHandle<std::io::Result<()>> = tokio::spawn(async move { socketmap_server.serve(socketmap_listener, socketmap_rx).await });

    tokio::signal::ctrl_c().await?;
    trc::Event::new(trc::EventType::LmtpDisconnect).with("reason", "shutdown requested").send();
    let _ = shutdown_tx.send(true);

    let _ = lmtp_task.await;
    let _ = socketmap_task.await;
    Ok(())
}

async fn run_lmtp(
    listener: UnixListener,
    ctx: Arc<SessionContext>,
    limiter: ConcurrencyLimiter,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let connections = Arc::new(tokio::sync::Mutex::new(Vec::<JoinHandle<()>>::new()));

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, _) = accepted?;

                let Some(in_flight) = limiter.is_allowed() else {
                    trc::Event::new(trc::EventType::LmtpRejected)
                        .with("error", "too many concurrent connections")
                        .send();
                    continue;
                };

                let ctx = ctx.clone();
                let handle = tokio::spawn(async move {
                    let _in_flight = in_flight;
                    trc::Event::new(trc::EventType::LmtpConnect).send();
                    if let Err(err) = session::run_session(stream, &ctx).await {
                        trc::Event::new(trc::EventType::LmtpRejected)
                            .with("error", err.to_string())
                            .send();
                    }
                });
                let mut guard = connections.lock().await;
                guard.push(handle);
                guard.retain(|h| !h.is_finished());
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    let handles: Vec<_> = connections.lock().await.drain(..).collect();
    for handle in handles {
        let _ = handle.await;
    }
    Ok(())
}

fn to_io_error(e: store::StoreError) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::Other, e.to_string())
}

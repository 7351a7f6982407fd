//! Server lifecycle: bind, serve in the background, stop, replace.
//!
//! `ServerManager` owns at most one running [`ServerHandle`]. Starting a new
//! server stops the previous one and waits for its accept loop to exit before
//! binding, so restarting on the same port does not race the old listener.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Deserialize;
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::AppState;
use crate::config::Config;
use crate::error::ServerError;
use crate::routes;

const SHUTDOWN_POLL: Duration = Duration::from_millis(100);
const LISTEN_BACKLOG: u32 = 1024;

/// A running server: its bound address, the accept loop task and the flag
/// that flips once that loop has exited.
pub struct ServerHandle {
    addr: SocketAddr,
    shutdown: Arc<Notify>,
    is_down: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl ServerHandle {
    /// Bind the configured address and start serving in a background task.
    pub async fn spawn(config: Config) -> Result<Self, ServerError> {
        let state = AppState::new(config)?;
        let addr = parse_addr(&state.config.listen_ip, state.config.port)?;
        let listener = bind(addr)?;
        let addr = listener.local_addr().map_err(ServerError::LocalAddr)?;

        let shutdown = Arc::new(Notify::new());
        let is_down = Arc::new(AtomicBool::new(false));
        let app = routes::app(state);

        let stop = shutdown.clone();
        let down = is_down.clone();
        let task = tokio::spawn(async move {
            // Connections are spawned by `serve` and outlive the accept loop;
            // dropping the serve future only closes the listener.
            tokio::select! {
                result = axum::serve(listener, app).into_future() => {
                    if let Err(err) = result {
                        error!("Server on {} stopped with error: {}", addr, err);
                    }
                }
                _ = stop.notified() => {
                    debug!("Accept loop on {} asked to stop", addr);
                }
            }
            down.store(true, Ordering::SeqCst);
        });

        info!("Listening on: http://{}", addr);

        Ok(Self {
            addr,
            shutdown,
            is_down,
            task: Some(task),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_down(&self) -> bool {
        self.is_down.load(Ordering::SeqCst)
    }

    /// Shared view of the down flag that stays valid after the handle is gone.
    pub fn down_flag(&self) -> Arc<AtomicBool> {
        self.is_down.clone()
    }

    /// Stop accepting connections and wait until the accept loop has exited.
    ///
    /// In-flight requests are not waited for.
    pub async fn shutdown(&mut self) {
        self.shutdown.notify_one();

        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                error!("Accept loop on {} ended abnormally: {}", self.addr, err);
                self.is_down.store(true, Ordering::SeqCst);
            }
        }

        while !self.is_down() {
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }
        info!("Server on {} stopped", self.addr);
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.shutdown.notify_one();
    }
}

fn parse_addr(listen_ip: &str, port: u16) -> Result<SocketAddr, ServerError> {
    let ip: IpAddr = listen_ip
        .parse()
        .map_err(|_| ServerError::InvalidAddress(listen_ip.to_string()))?;
    Ok(SocketAddr::new(ip, port))
}

fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    let map_err = |source| ServerError::Bind { addr, source };
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(map_err)?;
    socket.set_reuseaddr(true).map_err(map_err)?;
    socket.bind(addr).map_err(map_err)?;
    socket.listen(LISTEN_BACKLOG).map_err(map_err)
}

/// Parameters a host passes when it asks for the editor to be started or
/// stopped.
#[derive(Debug, Clone, Deserialize)]
pub struct StartOptions {
    #[serde(default = "default_listen_ip")]
    pub listen_ip: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub ignore_pattern: Option<Vec<String>>,
    #[serde(default)]
    pub dir_first: bool,
    #[serde(default)]
    pub hide_hidden: bool,
    #[serde(default = "default_page_title")]
    pub page_title: String,
    #[serde(default)]
    pub stop_server: bool,
}

fn default_listen_ip() -> String {
    Config::default().listen_ip
}

fn default_port() -> u16 {
    Config::default().port
}

fn default_page_title() -> String {
    Config::default().page_title
}

impl Default for StartOptions {
    fn default() -> Self {
        Self {
            listen_ip: default_listen_ip(),
            port: default_port(),
            ignore_pattern: None,
            dir_first: false,
            hide_hidden: false,
            page_title: default_page_title(),
            stop_server: false,
        }
    }
}

impl StartOptions {
    /// Overlay these options on `base`.
    pub fn into_config(self, base: Config) -> Config {
        Config {
            listen_ip: self.listen_ip,
            port: self.port,
            ignore_pattern: self.ignore_pattern.unwrap_or_default(),
            dir_first: self.dir_first,
            hide_hidden: self.hide_hidden,
            page_title: self.page_title,
            ..base
        }
    }
}

/// Owner of the single running server.
#[derive(Default)]
pub struct ServerManager {
    slot: Mutex<Option<ServerHandle>>,
}

impl ServerManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a server for `config`, stopping any server already running.
    ///
    /// Bind failures are returned; the previous server stays stopped.
    pub async fn start(&self, config: Config) -> Result<SocketAddr, ServerError> {
        let mut slot = self.slot.lock().await;
        if let Some(mut running) = slot.take() {
            info!("Editor is running on {}, stopping now...", running.local_addr());
            running.shutdown().await;
        }

        let handle = ServerHandle::spawn(config).await?;
        let addr = handle.local_addr();
        *slot = Some(handle);
        Ok(addr)
    }

    /// Stop the running server, if any. Returns whether one was stopped.
    pub async fn stop(&self) -> bool {
        let mut slot = self.slot.lock().await;
        match slot.take() {
            Some(mut running) => {
                running.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Handle a host request: stop only, or (re)start with the given options.
    pub async fn apply(
        &self,
        options: StartOptions,
        base: Config,
    ) -> Result<Option<SocketAddr>, ServerError> {
        if options.stop_server {
            if self.stop().await {
                info!("Editor stopped");
            }
            return Ok(None);
        }
        self.start(options.into_config(base)).await.map(Some)
    }

    pub async fn is_running(&self) -> bool {
        self.slot.lock().await.is_some()
    }

    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.slot.lock().await.as_ref().map(ServerHandle::local_addr)
    }

    /// Down flag of the running server, for callers that need to observe its
    /// shutdown after it has been replaced.
    pub async fn down_flag(&self) -> Option<Arc<AtomicBool>> {
        self.slot.lock().await.as_ref().map(ServerHandle::down_flag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_addr() {
        assert_eq!(
            parse_addr("127.0.0.1", 8000).unwrap(),
            "127.0.0.1:8000".parse::<SocketAddr>().unwrap()
        );
        assert_eq!(parse_addr("::1", 9).unwrap().port(), 9);
        assert!(matches!(
            parse_addr("localhost", 80),
            Err(ServerError::InvalidAddress(_))
        ));
    }

    #[test]
    fn test_start_options_defaults() {
        let options: StartOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(options.listen_ip, "0.0.0.0");
        assert_eq!(options.port, 8000);
        assert!(!options.stop_server);
        assert!(options.ignore_pattern.is_none());
    }

    #[test]
    fn test_start_options_into_config_keeps_base() {
        let base = Config {
            max_upload_size: 10,
            restrict_paths: true,
            base_dir: Some("/srv".into()),
            ..Config::default()
        };
        let options = StartOptions {
            port: 1234,
            dir_first: true,
            ignore_pattern: Some(vec!["*.bak".to_string()]),
            ..StartOptions::default()
        };
        let config = options.into_config(base);
        assert_eq!(config.port, 1234);
        assert!(config.dir_first);
        assert_eq!(config.ignore_pattern, vec!["*.bak".to_string()]);
        assert_eq!(config.max_upload_size, 10);
        assert!(config.restrict_paths);
    }

    #[tokio::test]
    async fn test_handle_shutdown_sets_flag() {
        let config = Config {
            listen_ip: "127.0.0.1".to_string(),
            port: 0,
            ..Config::default()
        };
        let mut handle = ServerHandle::spawn(config).await.unwrap();
        assert_ne!(handle.local_addr().port(), 0);
        assert!(!handle.is_down());

        handle.shutdown().await;
        assert!(handle.is_down());
    }

    #[tokio::test]
    async fn test_spawn_rejects_invalid_config() {
        let config = Config {
            listen_ip: "127.0.0.1".to_string(),
            port: 0,
            ignore_pattern: vec!["[".to_string()],
            ..Config::default()
        };
        assert!(matches!(
            ServerHandle::spawn(config).await,
            Err(ServerError::Config(_))
        ));
    }
}

//! TCP listener and per-connection tasks.
//!
//! The Lua state is not `Send`, so every connection runs as a local task;
//! [`BridgeServer::serve`] must be polled inside a [`tokio::task::LocalSet`].

use std::future::Future;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tokio::task::LocalSet;

use crate::config::Config;
use crate::constants::{ACCEPT_ERROR_BACKOFF, ALIVE_SCRIPT};
use crate::dispatch::{Dispatcher, Sandbox};
use crate::env::Environment;
use crate::lua::LuaScriptLoader;
use crate::objects::ObjectRegistry;
use crate::packages::PackageTable;
use crate::script::ScriptLoader;
use crate::session::Connection;

/// Everything shared, read-only, by all connections.
#[derive(Debug, Clone)]
pub struct Bridge {
    registry: Arc<ObjectRegistry>,
    dispatcher: Arc<Dispatcher>,
}

impl Bridge {
    /// Assemble from parts.
    pub fn new(registry: Arc<ObjectRegistry>, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            registry,
            dispatcher,
        }
    }

    /// Build the production bridge: discover packages, set up the sandbox
    /// and Lua loader, and run the startup probe.
    pub fn from_config(config: &Config, environment: Environment) -> Result<Self> {
        let root = config.canonical_scripts_root()?;
        log::info!("Scripts root: {}", root.display());

        let packages = PackageTable::discover(&config.packages_dir())?;
        log::info!("Packages: {:?}", packages.names());

        let sandbox = Sandbox::new(root.clone(), Arc::new(packages))
            .with_extensions(&config.script_extension, &config.foreign_extension);
        let loader = LuaScriptLoader::with_search_root(&root);
        probe_alive(&root, &config.script_extension, &loader)?;

        let dispatcher = Dispatcher::new(sandbox, Arc::new(loader), environment);
        Ok(Self::new(
            Arc::new(ObjectRegistry::with_defaults()),
            Arc::new(dispatcher),
        ))
    }

    /// A new connection bound to this bridge.
    pub fn connection(&self, id: impl Into<String>) -> Connection {
        Connection::new(id, Arc::clone(&self.registry), Arc::clone(&self.dispatcher))
    }
}

/// Load `<root>/alive.<ext>` once, if present, to prove scripts load.
fn probe_alive(root: &Path, extension: &str, loader: &dyn ScriptLoader) -> Result<()> {
    let path = root.join(format!("{ALIVE_SCRIPT}.{extension}"));
    if !path.is_file() {
        log::debug!("No {} found, skipping script probe", path.display());
        return Ok(());
    }
    loader
        .load(&path)
        .with_context(|| format!("Unable to load script {}", path.display()))?;
    log::info!("Script loading enabled ({} loaded)", path.display());
    Ok(())
}

/// Accepts peers and runs a [`Connection`] for each.
#[derive(Debug)]
pub struct BridgeServer {
    listener: TcpListener,
    bridge: Bridge,
}

impl BridgeServer {
    /// Bind the listener.
    pub async fn bind(addr: &str, bridge: Bridge) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        log::info!("[Server] Listening on {}", listener.local_addr()?);
        Ok(Self { listener, bridge })
    }

    /// Bound address (useful when binding port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until `shutdown` resolves.
    ///
    /// Must run inside a [`LocalSet`]. Open connections are dropped with
    /// the set.
    pub async fn serve<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::select! {
            () = self.accept_loop() => {}
            () = shutdown => log::info!("[Server] Shutting down"),
        }
    }

    async fn accept_loop(&self) {
        let mut next_id: u64 = 1;
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    let id = format!("conn-{next_id}");
                    next_id += 1;
                    log::info!("[Server] Accepted {id} from {addr}");
                    if let Err(e) = stream.set_nodelay(true) {
                        log::warn!("[Server] Failed to set TCP_NODELAY for {id}: {e}");
                    }
                    tokio::task::spawn_local(self.bridge.connection(id).run(stream));
                }
                Err(e) => {
                    log::error!("[Server] Accept error: {e}");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }
}

/// Run the bridge until Ctrl-C.
pub async fn run(config: Config, environment: Environment) -> Result<()> {
    let bridge = Bridge::from_config(&config, environment)?;
    let server = BridgeServer::bind(&config.listen_addr, bridge).await?;
    LocalSet::new().run_until(server.serve(ctrl_c())).await;
    Ok(())
}

async fn ctrl_c() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => log::info!("Received Ctrl-C"),
        Err(e) => {
            log::error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpStream;

    fn config_for(root: &Path) -> Config {
        Config {
            listen_addr: "127.0.0.1:0".to_string(),
            scripts_root: root.to_path_buf(),
            ..Config::default()
        }
    }

    #[test]
    fn test_alive_probe_failure_is_startup_error() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("alive.lua"), "return 42").unwrap();
        let err = Bridge::from_config(&config_for(temp.path()), Environment::Test).unwrap_err();
        assert!(err.to_string().contains("Unable to load script"));
    }

    #[test]
    fn test_missing_scripts_root_is_startup_error() {
        let temp = TempDir::new().unwrap();
        assert!(Bridge::from_config(&config_for(&temp.path().join("absent")), Environment::Test).is_err());
    }

    #[tokio::test]
    async fn test_server_assigns_ids_and_answers_ping() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join("alive.lua"), "return function() return true end").unwrap();
        let bridge = Bridge::from_config(&config_for(temp.path()), Environment::Test).unwrap();
        let server = BridgeServer::bind("127.0.0.1:0", bridge).await.unwrap();
        let addr = server.local_addr().unwrap();

        LocalSet::new()
            .run_until(async move {
                let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
                let serving = tokio::task::spawn_local(server.serve(async {
                    let _ = stop_rx.await;
                }));

                for _ in 0..2 {
                    let stream = TcpStream::connect(addr).await.unwrap();
                    let (read_half, mut write_half) = stream.into_split();
                    let mut lines = BufReader::new(read_half).lines();
                    write_half.write_all(b"PING\n").await.unwrap();
                    let line = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
                        .await
                        .expect("timed out waiting for pong")
                        .unwrap();
                    assert_eq!(line.as_deref(), Some("pong"));
                }

                stop_tx.send(()).unwrap();
                serving.await.unwrap();
            })
            .await;
    }
}

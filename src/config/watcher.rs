//! Hot reload of the authorization tables.
//!
//! `notify` reports raw file events from its own thread. They are forwarded
//! to a Tokio task that waits for the burst to settle, reloads the file and
//! emits the new configuration only when the `[authz]` section changed.

use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{Config, Event, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::config::loader::load_config;
use crate::config::schema::{AuthzConfig, GatewayConfig};

/// Editors write files in several steps; events closer than this are merged.
const SETTLE_DELAY: Duration = Duration::from_millis(500);

pub struct ConfigWatcher {
    path: PathBuf,
    current: AuthzConfig,
    updates: mpsc::UnboundedSender<GatewayConfig>,
}

impl ConfigWatcher {
    /// `current` is the policy already in effect; reloads equal to it are dropped.
    pub fn new(path: &Path, current: AuthzConfig) -> (Self, mpsc::UnboundedReceiver<GatewayConfig>) {
        let (updates, rx) = mpsc::unbounded_channel();
        (
            Self {
                path: path.to_path_buf(),
                current,
                updates,
            },
            rx,
        )
    }

    /// Start watching. Keep the returned watcher alive for as long as
    /// updates are wanted; the task ends on shutdown.
    pub fn run(
        self,
        shutdown: broadcast::Receiver<()>,
    ) -> Result<(RecommendedWatcher, JoinHandle<()>), notify::Error> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) if event.kind.is_modify() || event.kind.is_create() => {
                    let _ = events_tx.send(());
                }
                Ok(_) => {}
                Err(e) => tracing::error!(error = %e, "Config watch error"),
            },
            Config::default().with_poll_interval(Duration::from_secs(2)),
        )?;
        watcher.watch(&self.path, RecursiveMode::NonRecursive)?;
        tracing::info!(path = %self.path.display(), "Config watcher started");

        let task = tokio::spawn(self.forward(events_rx, shutdown));
        Ok((watcher, task))
    }

    async fn forward(
        mut self,
        mut events: mpsc::UnboundedReceiver<()>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => {
                    if event.is_none() {
                        break;
                    }
                    tokio::time::sleep(SETTLE_DELAY).await;
                    while events.try_recv().is_ok() {}
                    self.reload();
                }
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("Config watcher stopped");
    }

    fn reload(&mut self) {
        let config = match load_config(&self.path) {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(error = %e, "Config reload rejected, keeping current policy");
                return;
            }
        };

        if config.authz == self.current {
            tracing::debug!("Config changed outside [authz], nothing to reload");
            return;
        }

        self.current = config.authz.clone();
        let _ = self.updates.send(config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(path: &Path, estagiario_modules: &str) {
        fs::write(
            path,
            format!(
                "[auth]\njwt_secret = \"0123456789abcdef0123456789abcdef\"\n\
                 [authz.role_modules]\nestagiario = [{estagiario_modules}]\n"
            ),
        )
        .unwrap();
    }

    #[test]
    fn test_reload_only_on_authz_change() {
        let path = std::env::temp_dir().join("erp_gateway_watcher_test.toml");
        write(&path, "\"vendas\"");
        let initial = load_config(&path).unwrap();

        let (mut watcher, mut rx) = ConfigWatcher::new(&path, initial.authz.clone());

        watcher.reload();
        assert!(rx.try_recv().is_err());

        write(&path, "\"vendas\", \"compras\"");
        watcher.reload();
        let updated = rx.try_recv().unwrap();
        assert_eq!(
            updated.authz.role_modules["estagiario"],
            vec!["vendas".to_string(), "compras".to_string()]
        );

        fs::write(&path, "[timeouts]\nrequest_secs = 0\n").unwrap();
        watcher.reload();
        assert!(rx.try_recv().is_err());

        fs::remove_file(&path).unwrap_or_default();
    }
}

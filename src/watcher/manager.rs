//! Process-wide live-reload manager.
//!
//! Owns the project map, the per-project watch loops, and the shared HTTP
//! listener. One lightweight task per enabled project watches its directory
//! tree and debounces change bursts into a single reload broadcast; one task
//! per subscribed browser tab drains a dedicated signal channel into an
//! event-stream response.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::config::Settings;
use crate::project::Project;
use crate::server;
use crate::{debug_event, log_event};

use super::error::WatchError;
use super::events::ChangeKind;
use super::ignore::is_ignored_path;

/// Per-project watch state. Created by `enable`, destroyed by `disable`.
struct ProjectWatchState {
    /// Open subscriber channels, keyed by an opaque per-connection id.
    /// Dropping a sender closes that subscriber's stream.
    clients: HashMap<String, mpsc::Sender<()>>,
    /// Cancelling this token makes the watch loop drop its watcher and exit.
    cancel: CancellationToken,
}

struct ServerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Live-reload notification engine.
///
/// Construct once at process start with [`ReloadManager::new`], pass the
/// `Arc` to every consumer, and call [`ReloadManager::stop`] before exit.
/// All structural mutations (enable/disable/subscribe) go through a single
/// lock; critical sections are map operations only, never I/O.
pub struct ReloadManager {
    port: u16,
    debounce: Duration,
    client_buffer: usize,
    /// Port actually bound; differs from `port` when configured as 0.
    actual_port: AtomicU16,
    projects: Mutex<HashMap<String, ProjectWatchState>>,
    server: tokio::sync::Mutex<Option<ServerHandle>>,
}

impl ReloadManager {
    pub fn new(settings: &Settings) -> Arc<Self> {
        Arc::new(Self {
            port: settings.server.port,
            debounce: Duration::from_millis(settings.watch.debounce_ms),
            client_buffer: settings.watch.client_buffer.max(1),
            actual_port: AtomicU16::new(settings.server.port),
            projects: Mutex::new(HashMap::new()),
            server: tokio::sync::Mutex::new(None),
        })
    }

    /// Port the event-stream listener is reachable on.
    pub fn port(&self) -> u16 {
        self.actual_port.load(Ordering::Relaxed)
    }

    /// URL a browser subscribes to for the given project.
    pub fn endpoint_url(&self, project_id: &str) -> String {
        server::endpoint_url(self.port(), project_id)
    }

    /// Inline script tag that subscribes a page to reload signals.
    pub fn client_script(&self, project_id: &str) -> String {
        server::client_script(self.port(), project_id)
    }

    /// Whether live reload is currently enabled for a project id.
    pub fn is_enabled(&self, project_id: &str) -> bool {
        self.projects.lock().contains_key(project_id)
    }

    /// Start the shared HTTP listener. Lazy and idempotent: the first call
    /// binds and serves, later calls are no-ops while a listener is active.
    pub async fn start(self: &Arc<Self>) -> Result<(), WatchError> {
        let mut server_slot = self.server.lock().await;
        if server_slot.is_some() {
            return Ok(());
        }

        let listener = TcpListener::bind(("127.0.0.1", self.port))
            .await
            .map_err(|source| WatchError::BindFailed {
                port: self.port,
                source,
            })?;
        let actual_port = listener
            .local_addr()
            .map_err(|source| WatchError::BindFailed {
                port: self.port,
                source,
            })?
            .port();
        self.actual_port.store(actual_port, Ordering::Relaxed);

        let router = server::router(Arc::clone(self));
        let cancel = CancellationToken::new();
        let shutdown = cancel.clone().cancelled_owned();
        let task = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router)
                .with_graceful_shutdown(shutdown)
                .await
            {
                tracing::warn!("[server] listener error: {e}");
            }
        });

        log_event!("server", "listening", "127.0.0.1:{actual_port}");
        *server_slot = Some(ServerHandle { cancel, task });
        Ok(())
    }

    /// Enable live reload for a project.
    ///
    /// Idempotent: enabling an already-enabled id is a no-op success.
    /// Fails fast on an empty or unreadable path and on watcher-handle
    /// creation; per-directory registration failures during the initial walk
    /// are best-effort and never fail the call.
    pub async fn enable(self: &Arc<Self>, project: &Project) -> Result<(), WatchError> {
        if project.path.as_os_str().is_empty() {
            return Err(WatchError::EmptyPath);
        }
        if !project.path.is_dir() {
            return Err(WatchError::PathNotFound {
                path: project.path.clone(),
            });
        }

        self.start().await?;

        if self.is_enabled(&project.id) {
            return Ok(());
        }

        let (tx, rx) = mpsc::channel(256);
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
            let _ = tx.blocking_send(res);
        })?;
        add_watch_recursive(&mut watcher, &project.path);

        let cancel = CancellationToken::new();
        {
            let mut projects = self.projects.lock();
            if projects.contains_key(&project.id) {
                // Lost a race with a concurrent enable; the fresh watcher is
                // simply dropped.
                return Ok(());
            }
            projects.insert(
                project.id.clone(),
                ProjectWatchState {
                    clients: HashMap::new(),
                    cancel: cancel.clone(),
                },
            );
        }

        log_event!("watcher", "enabled", "{} ({})", project.id, project.path.display());

        let manager = Arc::clone(self);
        let project_id = project.id.clone();
        tokio::spawn(async move {
            manager.watch_loop(project_id, watcher, rx, cancel).await;
        });
        Ok(())
    }

    /// Disable live reload for a project id.
    ///
    /// Closes every subscriber channel (terminating their streams), stops the
    /// watch loop, and releases the watcher. Safe to call on an unknown or
    /// already-disabled id.
    pub fn disable(&self, project_id: &str) {
        let state = self.projects.lock().remove(project_id);
        let Some(state) = state else {
            return;
        };

        // Dropping the client map drops every sender, which wakes and ends
        // each subscriber stream.
        drop(state.clients);
        state.cancel.cancel();
        log_event!("watcher", "disabled", "{project_id}");
    }

    /// Disable every project and shut the listener down, waiting up to
    /// `deadline` for in-flight requests to drain.
    pub async fn stop(&self, deadline: Duration) -> Result<(), WatchError> {
        let ids: Vec<String> = self.projects.lock().keys().cloned().collect();
        for id in ids {
            self.disable(&id);
        }

        let handle = self.server.lock().await.take();
        let Some(handle) = handle else {
            return Ok(());
        };
        handle.cancel.cancel();
        match tokio::time::timeout(deadline, handle.task).await {
            Ok(_) => {
                log_event!("server", "stopped");
                Ok(())
            }
            Err(_) => Err(WatchError::ShutdownTimeout),
        }
    }

    /// Register a new subscriber for a project.
    ///
    /// Returns `None` when the project is not enabled. The subscription
    /// deregisters itself when dropped, whatever the termination reason.
    pub fn subscribe(self: &Arc<Self>, project_id: &str) -> Option<Subscription> {
        let client_id = random_client_id();
        let (tx, rx) = mpsc::channel(self.client_buffer);

        {
            let mut projects = self.projects.lock();
            let state = projects.get_mut(project_id)?;
            state.clients.insert(client_id.clone(), tx);
        }

        debug_event!("server", "subscribed", "{project_id} client {client_id}");
        Some(Subscription {
            rx,
            guard: ClientGuard {
                manager: Arc::clone(self),
                project_id: project_id.to_string(),
                client_id,
            },
        })
    }

    /// Push a reload pulse to every subscriber of a project, non-blocking.
    /// A channel already holding a full buffer is skipped; a stalled browser
    /// tab loses a pulse, never stalls the broadcaster.
    fn broadcast(&self, project_id: &str) {
        let projects = self.projects.lock();
        let Some(state) = projects.get(project_id) else {
            return;
        };
        for tx in state.clients.values() {
            let _ = tx.try_send(());
        }
        debug_event!(
            "watcher",
            "broadcast",
            "{project_id} to {} clients",
            state.clients.len()
        );
    }

    /// Per-project watch loop. Owns the watcher handle; exits (dropping the
    /// handle) on cancellation or when the event channel closes. Channel
    /// closure is a silent failure by design of this best-effort subsystem.
    async fn watch_loop(
        self: Arc<Self>,
        project_id: String,
        mut watcher: RecommendedWatcher,
        mut rx: mpsc::Receiver<notify::Result<Event>>,
        cancel: CancellationToken,
    ) {
        let mut deadline: Option<Instant> = None;

        loop {
            // select! evaluates every branch expression, so feed it a real
            // instant even when no trigger is pending; the guard keeps the
            // disabled branch from being polled.
            let wake = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(60));

            tokio::select! {
                _ = cancel.cancelled() => break,

                _ = sleep_until(wake), if deadline.is_some() => {
                    deadline = None;
                    self.broadcast(&project_id);
                }

                res = rx.recv() => match res {
                    None => break,
                    Some(Err(e)) => {
                        debug_event!("watcher", "event error", "{project_id}: {e}");
                    }
                    Some(Ok(event)) => {
                        // Trees created after enable get covered immediately,
                        // before any debounce delay.
                        if matches!(event.kind, EventKind::Create(_)) {
                            for path in &event.paths {
                                if path.is_dir() && !is_ignored_path(path) {
                                    add_watch_recursive(&mut watcher, path);
                                }
                            }
                        }

                        if ChangeKind::from_event(&event.kind).is_some()
                            && event.paths.iter().any(|p| !is_ignored_path(p))
                        {
                            // Re-arm: bursts collapse into one trigger fired a
                            // quiet window after the last qualifying event.
                            deadline = Some(Instant::now() + self.debounce);
                        }
                    }
                },
            }
        }

        debug_event!("watcher", "loop ended", "{project_id}");
        drop(watcher);
    }

    #[cfg(test)]
    fn client_count(&self, project_id: &str) -> usize {
        self.projects
            .lock()
            .get(project_id)
            .map_or(0, |s| s.clients.len())
    }
}

/// A registered subscriber: a signal receiver plus the guard that removes the
/// registration when the subscription is dropped.
pub struct Subscription {
    pub(crate) rx: mpsc::Receiver<()>,
    pub(crate) guard: ClientGuard,
}

impl Subscription {
    /// Wait for the next reload pulse. `None` means the project was disabled
    /// and the channel closed.
    pub async fn recv(&mut self) -> Option<()> {
        self.rx.recv().await
    }
}

/// Removes the subscriber's channel from the project's client map on drop.
pub struct ClientGuard {
    manager: Arc<ReloadManager>,
    project_id: String,
    client_id: String,
}

impl Drop for ClientGuard {
    fn drop(&mut self) {
        let mut projects = self.manager.projects.lock();
        if let Some(state) = projects.get_mut(&self.project_id) {
            state.clients.remove(&self.client_id);
        }
    }
}

/// Register a non-recursive watch on every directory under `root`, skipping
/// ignored subtrees entirely. Best-effort: per-entry walk errors and failed
/// registrations are logged at debug and otherwise dropped.
fn add_watch_recursive(watcher: &mut RecommendedWatcher, root: &Path) {
    let entries = WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| !is_ignored_path(e.path()));
    for entry in entries {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_dir() {
            continue;
        }
        if let Err(e) = watcher.watch(entry.path(), RecursiveMode::NonRecursive) {
            debug_event!("watcher", "watch failed", "{}: {e}", entry.path().display());
        }
    }
}

/// Opaque per-connection identifier: 8 random bytes, hex-encoded.
fn random_client_id() -> String {
    use rand::RngExt;
    let bytes: [u8; 8] = rand::rng().random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;
    use tokio::time::timeout;

    fn test_settings() -> Settings {
        let mut settings = Settings::default();
        settings.server.port = 0;
        settings.watch.debounce_ms = 100;
        settings
    }

    fn project_in(dir: &TempDir, id: &str) -> Project {
        Project {
            id: id.to_string(),
            path: dir.path().to_path_buf(),
            document_root: None,
        }
    }

    /// Give the platform watcher a moment to register before generating events.
    async fn settle() {
        tokio::time::sleep(Duration::from_millis(200)).await;
    }

    #[tokio::test]
    async fn enable_rejects_empty_and_missing_paths() {
        let manager = ReloadManager::new(&test_settings());

        let empty = Project {
            id: "empty".into(),
            path: PathBuf::new(),
            document_root: None,
        };
        assert!(matches!(
            manager.enable(&empty).await,
            Err(WatchError::EmptyPath)
        ));

        let missing = Project {
            id: "missing".into(),
            path: PathBuf::from("/no/such/path/at/all"),
            document_root: None,
        };
        assert!(matches!(
            manager.enable(&missing).await,
            Err(WatchError::PathNotFound { .. })
        ));
        assert!(!manager.is_enabled("missing"));
    }

    #[tokio::test]
    async fn enable_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let manager = ReloadManager::new(&test_settings());
        let project = project_in(&dir, "site");

        manager.enable(&project).await.unwrap();
        manager.enable(&project).await.unwrap();
        assert!(manager.is_enabled("site"));

        // A single disable tears the project down completely.
        manager.disable("site");
        assert!(!manager.is_enabled("site"));
        manager.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn burst_of_events_collapses_to_one_broadcast() {
        let dir = TempDir::new().unwrap();
        let manager = ReloadManager::new(&test_settings());
        let project = project_in(&dir, "site");
        manager.enable(&project).await.unwrap();
        let mut sub = manager.subscribe("site").unwrap();
        settle().await;

        for i in 0..5 {
            fs::write(dir.path().join(format!("file{i}.php")), "<?php\n").unwrap();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("reload pulse within the window")
            .expect("channel open");

        // The burst fits inside one quiet window: no second pulse follows.
        assert!(
            timeout(Duration::from_millis(400), sub.recv()).await.is_err(),
            "burst must coalesce into a single broadcast"
        );

        manager.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn ignored_directories_never_trigger() {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join(".git")).unwrap();
        let manager = ReloadManager::new(&test_settings());
        let project = project_in(&dir, "site");
        manager.enable(&project).await.unwrap();
        let mut sub = manager.subscribe("site").unwrap();
        settle().await;

        fs::write(dir.path().join(".git/index"), "ref").unwrap();

        assert!(
            timeout(Duration::from_millis(600), sub.recv()).await.is_err(),
            "changes under an ignored directory must not broadcast"
        );

        manager.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn new_directories_are_watched() {
        let dir = TempDir::new().unwrap();
        let manager = ReloadManager::new(&test_settings());
        let project = project_in(&dir, "site");
        manager.enable(&project).await.unwrap();
        let mut sub = manager.subscribe("site").unwrap();
        settle().await;

        // The mkdir itself is a qualifying create event.
        fs::create_dir(dir.path().join("pages")).unwrap();
        timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("mkdir pulse")
            .expect("channel open");

        // Files created inside the new directory must also trigger.
        fs::write(dir.path().join("pages/about.php"), "<?php\n").unwrap();
        timeout(Duration::from_secs(2), sub.recv())
            .await
            .expect("pulse for file in new directory")
            .expect("channel open");

        manager.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn disable_closes_subscriber_channels() {
        let dir = TempDir::new().unwrap();
        let manager = ReloadManager::new(&test_settings());
        let project = project_in(&dir, "site");
        manager.enable(&project).await.unwrap();
        let mut sub = manager.subscribe("site").unwrap();

        manager.disable("site");

        let closed = timeout(Duration::from_secs(1), sub.recv())
            .await
            .expect("subscriber wakes promptly");
        assert!(closed.is_none(), "channel must be closed after disable");
        assert!(!manager.is_enabled("site"));
        assert!(manager.subscribe("site").is_none());

        manager.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn saturated_subscriber_does_not_stall_broadcast() {
        let dir = TempDir::new().unwrap();
        let manager = ReloadManager::new(&test_settings());
        let project = project_in(&dir, "site");
        manager.enable(&project).await.unwrap();

        let mut slow = manager.subscribe("site").unwrap();
        let mut live = manager.subscribe("site").unwrap();

        // Far more pulses than the buffer holds; overflow is dropped, not
        // awaited.
        for _ in 0..25 {
            manager.broadcast("site");
        }

        timeout(Duration::from_millis(200), live.recv())
            .await
            .expect("healthy subscriber still receives")
            .expect("channel open");

        // The slow subscriber kept at most a buffer's worth.
        let mut buffered = 0;
        while slow.rx.try_recv().is_ok() {
            buffered += 1;
        }
        assert!(buffered <= 10, "buffered {buffered} pulses, expected <= 10");

        manager.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn dropping_a_subscription_deregisters_it() {
        let dir = TempDir::new().unwrap();
        let manager = ReloadManager::new(&test_settings());
        let project = project_in(&dir, "site");
        manager.enable(&project).await.unwrap();

        let sub = manager.subscribe("site").unwrap();
        let other = manager.subscribe("site").unwrap();
        assert_eq!(manager.client_count("site"), 2);

        drop(sub);
        assert_eq!(manager.client_count("site"), 1);
        drop(other);
        assert_eq!(manager.client_count("site"), 0);

        manager.stop(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test]
    async fn stop_tears_down_all_projects() {
        let dir_a = TempDir::new().unwrap();
        let dir_b = TempDir::new().unwrap();
        let manager = ReloadManager::new(&test_settings());
        manager.enable(&project_in(&dir_a, "a")).await.unwrap();
        manager.enable(&project_in(&dir_b, "b")).await.unwrap();

        manager.stop(Duration::from_secs(1)).await.unwrap();
        assert!(!manager.is_enabled("a"));
        assert!(!manager.is_enabled("b"));

        // Stop on an already-stopped manager is a no-op.
        manager.stop(Duration::from_secs(1)).await.unwrap();
    }
}

//! Fleet: one session per configured server, global shutdown fan-out.
//!
//! Each session's dispatcher runs as its own task. A panic inside one
//! dispatcher is converted to a critical log entry here; sibling sessions
//! keep running.

use crate::config::Config;
use crate::session::{GlobalSettings, Session};
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

pub struct Fleet {
    sessions: DashMap<String, Arc<Session>>,
    tasks: tokio::sync::Mutex<JoinSet<String>>,
}

impl Fleet {
    pub fn new(config: &Config, working_dir: PathBuf) -> Self {
        let global = GlobalSettings {
            nickname: config.nickname.clone(),
            display_timestamp: config.display_event_timestamp,
            working_dir,
        };
        let sessions = DashMap::new();
        for server in &config.servers.server {
            sessions.insert(
                server.name.to_lowercase(),
                Arc::new(Session::new(server.clone(), &global)),
            );
        }
        Self {
            sessions,
            tasks: tokio::sync::Mutex::new(JoinSet::new()),
        }
    }

    /// Look up a session by display name (case-insensitive).
    pub fn session(&self, name: &str) -> Option<Arc<Session>> {
        self.sessions
            .get(&name.to_lowercase())
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Spawn a dispatcher task for every server flagged to connect on
    /// start. Returns how many were started.
    pub async fn start(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        let mut started = 0;
        for entry in self.sessions.iter() {
            let session = Arc::clone(entry.value());
            if !session.autostart() {
                continue;
            }
            started += 1;
            let name = session.display_name().to_string();
            info!(server = %name, "starting session");
            tasks.spawn(async move {
                session.run().await;
                name
            });
        }
        started
    }

    /// Start one session on demand (e.g. after a config change).
    pub async fn start_session(&self, session: Arc<Session>) {
        let name = session.display_name().to_string();
        self.tasks.lock().await.spawn(async move {
            session.run().await;
            name
        });
    }

    /// Signal every session to shut down, in parallel.
    pub async fn shutdown_all(&self) {
        let mut handles = Vec::new();
        for entry in self.sessions.iter() {
            let session = Arc::clone(entry.value());
            handles.push(tokio::spawn(async move { session.shutdown().await }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }

    /// Wait for every dispatcher task to return. A panicked dispatcher is
    /// logged as critical and does not take the process down.
    pub async fn wait(&self) {
        loop {
            let joined = self.tasks.lock().await.join_next().await;
            match joined {
                None => return,
                Some(Ok(name)) => {
                    info!(server = %name, "session finished");
                }
                Some(Err(e)) if e.is_panic() => {
                    error!(error = %e, "PANIC ERROR in session dispatcher");
                }
                Some(Err(e)) => {
                    error!(error = %e, "session task failed");
                }
            }
        }
    }
}

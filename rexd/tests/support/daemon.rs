// Copyright 2023 Google LLC
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! An in-process daemon fixture. It runs the real supervisor on a
//! loopback port with throwaway keys and recording host integrations,
//! so tests can assert on the clipboard, the shell-open log and the
//! presence notifications without touching the machine they run on.

use std::{
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
};

use anyhow::Context;
use librexd::{
    codec::Codec,
    config::Settings,
    daemon::server::Server,
    host::{Clipboard, Host, Opener, Presence},
};
use russh_keys::key::KeyPair;
use tempfile::TempDir;
use tokio::net::TcpListener;

pub struct RecordingPresence {
    shutdown: Arc<AtomicBool>,
    pub notifications: Mutex<Vec<(String, String)>>,
    pub busy: AtomicBool,
}

impl Presence for RecordingPresence {
    fn set_busy(&self, busy: bool) {
        self.busy.store(busy, Ordering::SeqCst);
    }

    fn notify(&self, title: &str, text: &str) {
        self.notifications.lock().unwrap().push((String::from(title), String::from(text)));
    }

    fn idle(&self) -> bool {
        !self.shutdown.load(Ordering::SeqCst)
    }
}

impl RecordingPresence {
    /// The notification titles seen so far, in order.
    pub fn titles(&self) -> Vec<String> {
        self.notifications.lock().unwrap().iter().map(|(title, _)| title.clone()).collect()
    }
}

pub struct MemClipboard {
    pub text: Mutex<String>,
}

impl Clipboard for MemClipboard {
    fn get_text(&self) -> anyhow::Result<String> {
        Ok(self.text.lock().unwrap().clone())
    }

    fn set_text(&self, text: &str) -> anyhow::Result<()> {
        *self.text.lock().unwrap() = String::from(text);
        Ok(())
    }
}

pub struct RecordingOpener {
    pub opened: Mutex<Vec<(String, PathBuf)>>,
}

impl Opener for RecordingOpener {
    fn shell_open(&self, verb: &str, path: &Path) -> anyhow::Result<()> {
        self.opened.lock().unwrap().push((String::from(verb), path.to_path_buf()));
        Ok(())
    }
}

/// Handle for one running in-process daemon. Dropping it without
/// calling stop() aborts the supervisor task.
pub struct Daemon {
    pub addr: SocketAddr,
    pub username: String,
    pub client_key: Arc<KeyPair>,
    pub presence: Arc<RecordingPresence>,
    pub clipboard: Arc<MemClipboard>,
    pub opener: Arc<RecordingOpener>,
    pub working_dir: PathBuf,
    shutdown: Arc<AtomicBool>,
    serve_task: tokio::task::JoinHandle<anyhow::Result<()>>,
    _tmp_dir: TempDir,
}

impl Daemon {
    pub async fn spawn() -> anyhow::Result<Daemon> {
        Self::spawn_with(|_| {}).await
    }

    /// Start the daemon with a tweak applied to the default test
    /// settings, for tests that need a broken shell template or a
    /// particular working dir.
    pub async fn spawn_with<F>(tweak: F) -> anyhow::Result<Daemon>
    where
        F: FnOnce(&mut Settings),
    {
        let tmp_dir =
            tempfile::Builder::new().prefix("rexd-test").tempdir().context("creating tmp dir")?;

        let client_key = Arc::new(KeyPair::generate_ed25519().expect("ed25519 key generation is infallible"));
        let authorized = vec![client_key.clone_public_key().context("deriving client pubkey")?];
        let host_keys = vec![KeyPair::generate_ed25519().expect("ed25519 key generation is infallible")];

        let mut settings = Settings {
            listen_addr: String::from("127.0.0.1"),
            listen_port: 0,
            username: String::from("testuser"),
            authorized_keys: vec![],
            host_keys: vec![],
            working_dir: tmp_dir.path().to_path_buf(),
            shell: vec![String::from("/bin/sh")],
            shell_exec_flag: String::from("-c"),
            codec: Codec::default(),
        };
        tweak(&mut settings);

        let shutdown = Arc::new(AtomicBool::new(false));
        let presence = Arc::new(RecordingPresence {
            shutdown: Arc::clone(&shutdown),
            notifications: Mutex::new(vec![]),
            busy: AtomicBool::new(false),
        });
        let clipboard = Arc::new(MemClipboard { text: Mutex::new(String::new()) });
        let opener = Arc::new(RecordingOpener { opened: Mutex::new(vec![]) });
        let host = Host {
            presence: Arc::clone(&presence) as Arc<dyn Presence>,
            clipboard: Arc::clone(&clipboard) as Arc<dyn Clipboard>,
            opener: Arc::clone(&opener) as Arc<dyn Opener>,
        };

        let listener =
            TcpListener::bind(("127.0.0.1", 0)).await.context("binding test listener")?;
        let addr = listener.local_addr().context("resolving test listener addr")?;

        let username = settings.username.clone();
        let working_dir = settings.working_dir.clone();
        let server = Server::new(settings, host_keys, authorized, host);
        let serve_task = tokio::spawn(Server::serve(server, listener));

        Ok(Daemon {
            addr,
            username,
            client_key,
            presence,
            clipboard,
            opener,
            working_dir,
            shutdown,
            serve_task,
            _tmp_dir: tmp_dir,
        })
    }

    /// Flip the presence gate and wait for the supervisor to drain its
    /// sessions and return.
    pub async fn stop(self) -> anyhow::Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.serve_task.await.context("joining serve task")?
    }
}

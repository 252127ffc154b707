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

//! One authenticated connection's session: it owns the channel, spawns
//! the child (or a side-channel sink), wires the forwarder pair, and
//! performs the ordered shutdown that puts a real exit status on the
//! wire.
//!
//! The session moves through an explicit state machine:
//!
//! ```text
//!            ┌──────────────────────── timeout ───► discarded
//!            │
//!  Pending ──┴─ ready ──► Opening ──► Running ──► Closing ──► Closed
//!                         (spawn)    (forwarders) (drain+wait)
//! ```
//!
//! All of it runs in a driver task; the supervisor holds a [`Session`]
//! handle and answers the `closing` event by calling [`Session::close`].

use std::{process::Stdio, sync::Arc, time::Duration};

use anyhow::{anyhow, Context};
use russh::server::{Handle, Msg};
use russh::{Channel, ChannelId, CryptoVec, Disconnect};
use tokio::{
    net::unix::pipe,
    process,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, error, info, instrument, warn};

use super::{command::Command, forward, handler::Policy, receiver};
use crate::{config, consts, host::Host};

// How long the ordered shutdown will wait for the process-side
// forwarder to put the remaining output on the wire. Only a client
// that stopped reading can make us hit this.
const OUTPUT_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

// How long a child gets to finish on its own before the force-kill.
// The usual closing trigger is the client finishing its input, and
// the child's final burst of output only exists if the child gets to
// produce it.
const CHILD_EXIT_GRACE: Duration = Duration::from_millis(500);

/// What a session reports to the supervisor. Per session the order is
/// `open`, then at most one `closing`, then one `closed`; a session
/// that never negotiated emits exactly one `timeout` and nothing else.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEvent {
    pub session: String,
    pub kind: EventKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Open,
    Closing,
    Closed,
    Timeout,
}

/// The supervisor-side handle to a live session.
pub struct Session {
    name: String,
    close_tx: Option<oneshot::Sender<()>>,
    driver: JoinHandle<()>,
}

impl Session {
    /// Construct the session for a freshly opened channel and start
    /// its driver task. The driver holds its first event until the
    /// returned sender fires, so the caller can register the session
    /// with the supervisor without events outrunning the registration.
    pub fn spawn(
        name: String,
        channel: Channel<Msg>,
        handle: Handle,
        policy: Arc<Policy>,
        settings: config::Settings,
        host: Host,
        events: mpsc::UnboundedSender<SessionEvent>,
    ) -> (Session, oneshot::Sender<()>) {
        let (close_tx, close_rx) = oneshot::channel();
        let (registered_tx, registered_rx) = oneshot::channel();
        let driver = Driver {
            name: name.clone(),
            channel_id: channel.id(),
            channel: Some(channel),
            handle,
            policy,
            settings,
            host,
            events,
            registered_rx,
            close_rx,
            child: None,
            chan_task: None,
            proc_task: None,
        };
        let session =
            Session { name, close_tx: Some(close_tx), driver: tokio::spawn(driver.run()) };
        (session, registered_tx)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Drive the session through Closing to Closed and wait for it.
    /// Safe to call on a session that never reported `closing`: the
    /// driver shuts down from whatever state it is in.
    #[instrument(skip_all, fields(s = self.name))]
    pub async fn close(&mut self) {
        if let Some(tx) = self.close_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.driver).await {
            if e.is_panic() {
                error!("session driver panicked: {:?}", e);
            }
        }
    }
}

struct Driver {
    name: String,
    channel_id: ChannelId,
    /// The read half of the channel, consumed by whichever task the
    /// dispatch starts. Writes go through `handle` instead, so the
    /// two directions can never race on close.
    channel: Option<Channel<Msg>>,
    handle: Handle,
    policy: Arc<Policy>,
    settings: config::Settings,
    host: Host,
    events: mpsc::UnboundedSender<SessionEvent>,
    registered_rx: oneshot::Receiver<()>,
    close_rx: oneshot::Receiver<()>,
    child: Option<process::Child>,
    chan_task: Option<JoinHandle<()>>,
    proc_task: Option<JoinHandle<()>>,
}

impl Driver {
    #[instrument(skip_all, fields(s = self.name))]
    async fn run(mut self) {
        // Don't race our own registration.
        let _ = (&mut self.registered_rx).await;

        // Pending: the channel is open but the client has yet to ask
        // for a shell or an exec.
        let policy = Arc::clone(&self.policy);
        let ready = tokio::select! {
            res = tokio::time::timeout(consts::SESSION_READY_TIMEOUT, policy.ready()) => res.is_ok(),
            _ = &mut self.close_rx => {
                debug!("close requested before the session opened");
                self.shutdown().await;
                return;
            }
        };
        if !ready {
            info!("no shell or exec request within the deadline, discarding");
            self.emit(EventKind::Timeout);
            let _ = self
                .handle
                .disconnect(
                    Disconnect::ByApplication,
                    String::from("negotiation timed out"),
                    String::new(),
                )
                .await;
            return;
        }

        // Opening
        self.emit(EventKind::Open);
        if let Err(e) = self.open().await {
            // A failed spawn still closes cleanly with status 0; the
            // client sees an ordinary empty session.
            warn!("opening session: {:#}", e);
        }

        // Running: the first task to terminate moves us to Closing.
        let close_requested = self.wait_any_task().await;
        if !close_requested {
            self.emit(EventKind::Closing);
            let _ = (&mut self.close_rx).await;
        }
        self.shutdown().await;
    }

    /// Dispatch on the negotiated command and start the appropriate
    /// tasks. On return the channel read half has found its owner.
    async fn open(&mut self) -> anyhow::Result<()> {
        let channel = self.channel.take().ok_or_else(|| anyhow!("session opened twice"))?;
        let command = Command::parse(self.policy.command());
        info!("dispatching {:?}", command);

        match command {
            Command::ClipGet => {
                // produce-only: one send, no tasks, straight to Closing
                self.send_clipboard().await;
            }
            Command::ClipSet => {
                let sink = receiver::DataSink::Clipboard {
                    clipboard: Arc::clone(&self.host.clipboard),
                    codec: self.policy.codec(),
                };
                self.chan_task = Some(tokio::spawn(receiver::run(
                    channel,
                    self.handle.clone(),
                    self.channel_id,
                    self.policy.codec(),
                    sink,
                )));
            }
            Command::Open(verb) => {
                let sink = receiver::DataSink::Opener {
                    opener: Arc::clone(&self.host.opener),
                    verb,
                    working_dir: self.settings.working_dir.clone(),
                    codec: self.policy.codec(),
                };
                self.chan_task = Some(tokio::spawn(receiver::run(
                    channel,
                    self.handle.clone(),
                    self.channel_id,
                    self.policy.codec(),
                    sink,
                )));
            }
            Command::Shell => self.spawn_child(channel, None)?,
            Command::Exec(cmdline) => self.spawn_child(channel, Some(cmdline))?,
        }
        Ok(())
    }

    /// Spawn the child under the shell template and start the
    /// forwarder pair. stdout and stderr share one pipe so the channel
    /// sees output in the order the child wrote it.
    fn spawn_child(
        &mut self,
        channel: Channel<Msg>,
        cmdline: Option<String>,
    ) -> anyhow::Result<()> {
        let mut argv = self.settings.shell.clone();
        if let Some(cmdline) = cmdline {
            argv.push(self.settings.shell_exec_flag.clone());
            argv.push(cmdline);
        }
        if argv.is_empty() {
            return Err(anyhow!("empty shell template"));
        }

        let (merged_tx, merged_rx) = pipe::pipe().context("creating merged output pipe")?;
        let stdout_fd = merged_tx.into_blocking_fd().context("preparing child stdout")?;
        let stderr_fd = stdout_fd.try_clone().context("preparing child stderr")?;

        let mut cmd = process::Command::new(&argv[0]);
        cmd.args(&argv[1..])
            .current_dir(&self.settings.working_dir)
            .stdin(Stdio::piped())
            .stdout(stdout_fd)
            .stderr(stderr_fd);

        info!("spawning {:?} in {:?}", argv, self.settings.working_dir);
        let mut child = cmd.spawn().with_context(|| format!("spawning {:?}", argv[0]))?;
        // cmd drops here with the parent's copies of the pipe writer,
        // so the pipe hits end-of-stream when the child exits

        let stdin = child.stdin.take().ok_or_else(|| anyhow!("child stdin was not piped"))?;
        self.child = Some(child);
        self.chan_task = Some(tokio::spawn(forward::channel_to_stdin(channel, stdin)));
        self.proc_task = Some(tokio::spawn(forward::pipe_to_channel(
            merged_rx,
            self.handle.clone(),
            self.channel_id,
        )));
        Ok(())
    }

    /// `@clipget`: a single response with the clipboard text in the
    /// session codec. Failures become the usual diagnostic line.
    async fn send_clipboard(&mut self) {
        let clipboard = Arc::clone(&self.host.clipboard);
        let text = tokio::task::spawn_blocking(move || clipboard.get_text())
            .await
            .unwrap_or_else(|e| Err(anyhow!("clipboard task died: {}", e)));

        match text.and_then(|t| self.policy.codec().encode(&t)) {
            Ok(bytes) => {
                debug!("sending {} clipboard bytes", bytes.len());
                if self.handle.data(self.channel_id, CryptoVec::from_slice(&bytes)).await.is_err() {
                    debug!("channel refused clipboard payload");
                }
            }
            Err(e) => {
                warn!("clipget failed: {:#}", e);
                receiver::send_diagnostic(
                    &self.handle,
                    self.channel_id,
                    self.policy.codec(),
                    &format!("error: {:#}", e),
                )
                .await;
            }
        }
    }

    /// Park until any running task terminates or the supervisor asks
    /// us to close. Returns true in the latter case. With no tasks at
    /// all (clipget, failed spawn) this returns immediately.
    async fn wait_any_task(&mut self) -> bool {
        let mut chan_task = self.chan_task.take();
        let mut proc_task = self.proc_task.take();
        let mut close_requested = false;

        if chan_task.is_some() || proc_task.is_some() {
            tokio::select! {
                _ = join_slot(&mut chan_task) => debug!("channel-side task finished first"),
                _ = join_slot(&mut proc_task) => debug!("process-side task finished first"),
                _ = &mut self.close_rx => close_requested = true,
            }
        }

        self.chan_task = chan_task;
        self.proc_task = proc_task;
        close_requested
    }

    /// The ordered teardown. Reap the child first so the merged pipe
    /// hits end-of-stream, drain the process-side forwarder so every
    /// output byte precedes the exit status, cancel the channel-side
    /// task, and only then put `exit-status` on the wire and close.
    #[instrument(skip_all, fields(s = self.name))]
    async fn shutdown(&mut self) {
        let status = match self.child.take() {
            Some(mut child) => {
                let reaped = match tokio::time::timeout(CHILD_EXIT_GRACE, child.wait()).await {
                    Ok(res) => res,
                    Err(_) => {
                        info!("child did not exit in time, killing it");
                        if let Err(e) = child.start_kill() {
                            // it can beat us to exiting, that's fine
                            debug!("kill: {}", e);
                        }
                        child.wait().await
                    }
                };
                match reaped {
                    Ok(status) => exit_code(status),
                    Err(e) => {
                        warn!("reaping child: {}", e);
                        0
                    }
                }
            }
            None => 0,
        };

        if let Some(task) = self.proc_task.take() {
            match tokio::time::timeout(OUTPUT_DRAIN_TIMEOUT, task).await {
                Ok(Err(e)) if e.is_panic() => error!("process-side task panicked: {:?}", e),
                Ok(_) => {}
                Err(_) => warn!("gave up draining output to a non-reading client"),
            }
        }
        if let Some(task) = self.chan_task.take() {
            task.abort();
            let _ = task.await;
        }

        debug!("sending exit status {}", status);
        if self.handle.exit_status_request(self.channel_id, status).await.is_err() {
            debug!("channel already torn down, skipping exit status");
        } else {
            let _ = self.handle.eof(self.channel_id).await;
            let _ = self.handle.close(self.channel_id).await;
        }
        self.emit(EventKind::Closed);
    }

    fn emit(&self, kind: EventKind) {
        // a send can only fail once the supervisor is already draining
        let _ = self.events.send(SessionEvent { session: self.name.clone(), kind });
    }
}

/// Join the task in the slot, clearing the slot on completion. Empty
/// slots never resolve, which makes this convenient in a select.
async fn join_slot(slot: &mut Option<JoinHandle<()>>) {
    match slot.as_mut() {
        Some(task) => {
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!("session task panicked: {:?}", e);
                }
            }
            *slot = None;
        }
        None => std::future::pending().await,
    }
}

fn exit_code(status: std::process::ExitStatus) -> u32 {
    use std::os::unix::process::ExitStatusExt;
    match status.code() {
        Some(code) => code as u32,
        // killed by a signal; report it the way shells do
        None => 128 + status.signal().unwrap_or(0) as u32,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ntest::timeout;

    #[test]
    #[timeout(30000)]
    fn exit_codes() {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(exit_code(std::process::ExitStatus::from_raw(0)), 0);
        // wait(2) status 0x0700 is exit code 7
        assert_eq!(exit_code(std::process::ExitStatus::from_raw(7 << 8)), 7);
        // raw status 9 is "killed by SIGKILL"
        assert_eq!(exit_code(std::process::ExitStatus::from_raw(9)), 137);
    }
}

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

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use russh::server::{self, Auth, Msg, Session};
use russh::{Channel, ChannelId, MethodSet};
use russh_keys::key::PublicKey;
use russh_keys::PublicKeyBase64;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::codec::Codec;

/// The negotiated state of one connection, shared between the protocol
/// callbacks (which write it) and the session driver (which reads it).
pub struct Policy {
    username: String,
    codec: Codec,
    command: Mutex<Option<String>>,
    ready_tx: watch::Sender<bool>,
    ready_rx: watch::Receiver<bool>,
}

impl Policy {
    pub fn new(username: String, codec: Codec) -> Policy {
        let (ready_tx, ready_rx) = watch::channel(false);
        Policy { username, codec, command: Mutex::new(None), ready_tx, ready_rx }
    }

    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// The command carried by the accepted exec request, if any. None
    /// means a shell was requested instead.
    pub fn command(&self) -> Option<String> {
        self.command.lock().unwrap().clone()
    }

    /// Resolves once a shell or exec request has been accepted. The
    /// flag only ever goes false -> true, so whichever request arrives
    /// first wins and later ones are accepted without effect.
    pub async fn ready(&self) {
        let mut rx = self.ready_rx.clone();
        // the sender lives in this same struct, so this cannot fail
        let _ = rx.wait_for(|ready| *ready).await;
    }

    fn mark_ready(&self) {
        self.ready_tx.send_replace(true);
    }

    fn set_command(&self, command: String) {
        let mut slot = self.command.lock().unwrap();
        if slot.is_none() {
            *slot = Some(command);
        } else {
            warn!("ignoring command from second exec request");
        }
    }
}

/// The per-connection protocol callbacks. Anything not implemented
/// here (pty-req, subsystems, forwarding channels, ...) falls through
/// to a refusal, which is the contract: this daemon runs commands over
/// pipes and nothing else.
pub struct ConnHandler {
    policy: Arc<Policy>,
    authorized_keys: Arc<Vec<PublicKey>>,
    channel_tx: Option<oneshot::Sender<Channel<Msg>>>,
}

impl ConnHandler {
    pub fn new(
        policy: Arc<Policy>,
        authorized_keys: Arc<Vec<PublicKey>>,
        channel_tx: oneshot::Sender<Channel<Msg>>,
    ) -> ConnHandler {
        ConnHandler { policy, authorized_keys, channel_tx: Some(channel_tx) }
    }
}

#[async_trait]
impl server::Handler for ConnHandler {
    type Error = anyhow::Error;

    async fn auth_publickey(
        &mut self,
        user: &str,
        key: &PublicKey,
    ) -> Result<Auth, Self::Error> {
        if user != self.policy.username {
            // Unknown usernames get an empty method set rather than a
            // hint that publickey could work for somebody else.
            debug!(username = user, "rejecting unknown username");
            return Ok(Auth::Reject { proceed_with_methods: Some(MethodSet::empty()) });
        }

        let offered = key.public_key_bytes();
        if self.authorized_keys.iter().any(|k| k.public_key_bytes() == offered) {
            info!(username = user, "publickey authentication succeeded");
            Ok(Auth::Accept)
        } else {
            warn!(username = user, "offered key is not authorized");
            Ok(Auth::Reject { proceed_with_methods: None })
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _session: &mut Session,
    ) -> Result<bool, Self::Error> {
        match self.channel_tx.take() {
            Some(tx) => {
                debug!(channel = %channel.id(), "session channel opened");
                if tx.send(channel).is_err() {
                    warn!("connection task is gone, refusing channel");
                    return Ok(false);
                }
                Ok(true)
            }
            None => {
                // one channel per connection is served
                warn!("refusing second session channel");
                Ok(false)
            }
        }
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(channel = %channel, "shell request");
        self.policy.mark_ready();
        session.channel_success(channel);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        data: &[u8],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        match self.policy.codec().decode(data) {
            Ok(command) => {
                info!(channel = %channel, command = %command, "exec request");
                self.policy.set_command(command);
                self.policy.mark_ready();
                session.channel_success(channel);
            }
            Err(e) => {
                warn!(channel = %channel, "rejecting exec request: {}", e);
                session.channel_failure(channel);
            }
        }
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(russh::Pty, u32)],
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(channel = %channel, term, "refusing pty request");
        session.channel_failure(channel);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(channel = %channel, subsystem = name, "refusing subsystem request");
        session.channel_failure(channel);
        Ok(())
    }

    async fn env_request(
        &mut self,
        channel: ChannelId,
        variable_name: &str,
        _variable_value: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(channel = %channel, name = variable_name, "refusing env request");
        session.channel_failure(channel);
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        channel: ChannelId,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        debug!(channel = %channel, "refusing window change request");
        session.channel_failure(channel);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use ntest::timeout;

    #[test]
    #[timeout(30000)]
    fn ready_is_monotonic_and_command_write_once() {
        let policy = Policy::new(String::from("alice"), Codec::default());
        assert_eq!(policy.command(), None);

        policy.set_command(String::from("echo hi"));
        policy.mark_ready();
        // a later shell/exec request is accepted without effect
        policy.set_command(String::from("echo bye"));
        policy.mark_ready();

        assert_eq!(policy.command().as_deref(), Some("echo hi"));
        assert!(*policy.ready_rx.borrow());
    }
}

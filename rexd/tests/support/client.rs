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

//! A small ssh client for driving the daemon under test.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use russh::client;
use russh::{Channel, ChannelMsg};
use russh_keys::key;

use super::daemon::Daemon;

pub struct ClientHandler;

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &key::PublicKey,
    ) -> Result<bool, Self::Error> {
        // tests talk to a throwaway host key on loopback
        Ok(true)
    }
}

pub async fn connect(daemon: &Daemon) -> anyhow::Result<client::Handle<ClientHandler>> {
    let username = daemon.username.clone();
    connect_as(daemon, &username).await
}

pub async fn connect_as(
    daemon: &Daemon,
    username: &str,
) -> anyhow::Result<client::Handle<ClientHandler>> {
    let config = Arc::new(client::Config::default());
    let mut handle = client::connect(config, daemon.addr, ClientHandler)
        .await
        .context("connecting to test daemon")?;
    let authed = handle
        .authenticate_publickey(username, Arc::clone(&daemon.client_key))
        .await
        .context("authenticating")?;
    anyhow::ensure!(authed, "authentication rejected");
    Ok(handle)
}

/// What a finished channel produced.
pub struct Outcome {
    pub output: Vec<u8>,
    pub exit_status: Option<u32>,
}

impl Outcome {
    pub fn output_string(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }
}

/// Drive the channel until the server closes it, collecting data and
/// the exit status.
pub async fn collect(channel: &mut Channel<client::Msg>) -> Outcome {
    let mut output = Vec::new();
    let mut exit_status = None;
    while let Some(msg) = channel.wait().await {
        match msg {
            ChannelMsg::Data { data } => output.extend_from_slice(&data),
            ChannelMsg::ExitStatus { exit_status: status } => exit_status = Some(status),
            // the server puts exit-status on the wire before it closes
            ChannelMsg::Close => break,
            _ => {}
        }
    }
    Outcome { output, exit_status }
}

/// Run one exec command end to end, optionally feeding it input
/// followed by eof.
pub async fn exec(
    handle: &mut client::Handle<ClientHandler>,
    command: &str,
    input: Option<&[u8]>,
) -> anyhow::Result<Outcome> {
    let mut channel = handle.channel_open_session().await.context("opening session channel")?;
    channel.exec(true, command).await.context("sending exec request")?;
    if let Some(input) = input {
        channel.data(input).await.context("writing input")?;
        channel.eof().await.context("sending eof")?;
    }
    Ok(collect(&mut channel).await)
}

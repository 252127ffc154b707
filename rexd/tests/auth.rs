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

use std::sync::Arc;

use anyhow::Context;
use russh::client as ssh_client;
use russh_keys::key::KeyPair;

mod support;

use support::{client, daemon::Daemon, TEST_DEADLINE};

#[tokio::test]
async fn the_configured_user_and_key_get_in() -> anyhow::Result<()> {
    tokio::time::timeout(TEST_DEADLINE, async {
        let daemon = Daemon::spawn().await?;

        let mut handle = client::connect(&daemon).await?;
        let outcome = client::exec(&mut handle, "true", None).await?;
        assert_eq!(outcome.exit_status, Some(0));

        daemon.stop().await
    })
    .await
    .context("test deadline")?
}

#[tokio::test]
async fn unknown_usernames_are_rejected() -> anyhow::Result<()> {
    tokio::time::timeout(TEST_DEADLINE, async {
        let daemon = Daemon::spawn().await?;

        let config = Arc::new(ssh_client::Config::default());
        let mut handle =
            ssh_client::connect(config, daemon.addr, client::ClientHandler).await?;
        let authed = handle
            .authenticate_publickey("mallory", Arc::clone(&daemon.client_key))
            .await;
        // the right key is worthless under the wrong username
        assert!(!matches!(authed, Ok(true)));

        // and nothing was allowed to become a session
        assert!(daemon.presence.titles().is_empty());

        daemon.stop().await
    })
    .await
    .context("test deadline")?
}

#[tokio::test]
async fn unauthorized_keys_are_rejected() -> anyhow::Result<()> {
    tokio::time::timeout(TEST_DEADLINE, async {
        let daemon = Daemon::spawn().await?;

        let stranger = Arc::new(KeyPair::generate_ed25519().expect("ed25519 key generation is infallible"));
        let config = Arc::new(ssh_client::Config::default());
        let mut handle =
            ssh_client::connect(config, daemon.addr, client::ClientHandler).await?;
        let authed =
            handle.authenticate_publickey(daemon.username.as_str(), stranger).await;
        assert!(!matches!(authed, Ok(true)));

        assert!(daemon.presence.titles().is_empty());

        daemon.stop().await
    })
    .await
    .context("test deadline")?
}

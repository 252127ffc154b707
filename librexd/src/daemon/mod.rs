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

use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
};

use anyhow::{anyhow, Context};
use tokio::net::TcpListener;
use tracing::{info, instrument};

use crate::{config, consts, host, keys};

mod command;
mod forward;
mod handler;
mod receiver;
pub mod server;
pub mod session;
mod signals;

#[instrument(skip_all)]
pub fn run(
    config: config::Config,
    state_dir: PathBuf,
    host: Option<host::Host>,
) -> anyhow::Result<()> {
    info!("\n\n======================== STARTING DAEMON ============================\n\n");

    let settings = config.resolve(&state_dir).context("resolving configuration")?;

    let shutdown = Arc::new(AtomicBool::new(false));
    signals::register(Arc::clone(&shutdown)).context("registering signal handlers")?;
    let host = host.unwrap_or_else(|| host::Host::system(Arc::clone(&shutdown)));

    let host_keys = if settings.host_keys.is_empty() {
        vec![keys::ensure_host_key(&state_dir.join(consts::GENERATED_HOST_KEY_FILE))?]
    } else {
        keys::load_host_keys(&settings.host_keys)?
    };
    info!("host keys: {}", host_keys.len());

    let authorized_keys =
        keys::load_authorized_keys(&settings.authorized_keys).context("loading authorized keys")?;
    if authorized_keys.is_empty() {
        // pop the key dir open so the user can drop a key in
        let _ = host.opener.shell_open("explore", &state_dir);
        return Err(anyhow!(
            "no authorized keys found in {:?}, refusing to start",
            settings.authorized_keys
        ));
    }
    info!("username: '{}' (authorized keys: {})", settings.username, authorized_keys.len());

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("building async runtime")?;
    runtime.block_on(async {
        let listener = TcpListener::bind((settings.listen_addr.as_str(), settings.listen_port))
            .await
            .with_context(|| {
                format!("binding to {}:{}", settings.listen_addr, settings.listen_port)
            })?;

        let server = server::Server::new(settings, host_keys, authorized_keys, host);
        server::Server::serve(server, listener).await
    })
}

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

//! The data-sink half of the `@` side-channel commands: drain the
//! channel to end-of-stream into a bounded buffer, then hand the bytes
//! to whichever sink the command named. Anything that goes wrong turns
//! into a single human-readable diagnostic line on the channel; the
//! session closes cleanly either way.

use std::{path::PathBuf, sync::Arc};

use anyhow::anyhow;
use russh::server::{Handle, Msg};
use russh::{Channel, ChannelId, ChannelMsg, CryptoVec};
use tokio::task;
use tracing::{debug, info, warn};

use crate::{codec::Codec, consts, host};

/// Where a drained payload goes.
pub enum DataSink {
    /// `@clipset`: the decoded payload replaces the clipboard text.
    Clipboard { clipboard: Arc<dyn host::Clipboard>, codec: Codec },
    /// `@<verb>`: the decoded payload is a path to shell-open with the
    /// pre-bound verb, relative paths anchored at the session working
    /// directory.
    Opener { opener: Arc<dyn host::Opener>, verb: String, working_dir: PathBuf, codec: Codec },
}

impl DataSink {
    async fn recv(&self, data: Vec<u8>) -> anyhow::Result<()> {
        match self {
            DataSink::Clipboard { clipboard, codec } => {
                let text = codec.decode(&data)?;
                debug!("setting clipboard to {} chars", text.chars().count());
                let clipboard = Arc::clone(clipboard);
                task::spawn_blocking(move || clipboard.set_text(&text))
                    .await
                    .map_err(|e| anyhow!("clipboard task died: {}", e))??;
                Ok(())
            }
            DataSink::Opener { opener, verb, working_dir, codec } => {
                let path = codec.decode(&data)?;
                let path = working_dir.join(path.trim());
                info!("shell-open {:?} with verb '{}'", path, verb);
                opener.shell_open(verb, &path)
            }
        }
    }
}

/// The body of a side-channel sink task.
pub async fn run(
    mut channel: Channel<Msg>,
    handle: Handle,
    id: ChannelId,
    codec: Codec,
    sink: DataSink,
) {
    let mut data = Vec::new();
    let res = match drain(&mut channel, &mut data).await {
        Ok(()) => sink.recv(data).await,
        Err(e) => Err(e),
    };
    if let Err(e) = res {
        warn!("side-channel command failed: {:#}", e);
        send_diagnostic(&handle, id, codec, &format!("error: {:#}", e)).await;
    }
}

async fn drain(channel: &mut Channel<Msg>, data: &mut Vec<u8>) -> anyhow::Result<()> {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data: chunk }) => {
                if data.len() + chunk.len() > consts::MAX_RECV_BYTES {
                    return Err(anyhow!("payload larger than {} bytes", consts::MAX_RECV_BYTES));
                }
                data.extend_from_slice(&chunk);
            }
            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => return Ok(()),
            Some(msg) => debug!("data sink ignoring {:?}", msg),
        }
    }
}

/// One human-readable line, newline-terminated, in the session codec.
pub async fn send_diagnostic(handle: &Handle, id: ChannelId, codec: Codec, msg: &str) {
    let line = format!("{}\n", msg);
    // a diagnostic the codec cannot express still goes out as utf-8
    let bytes = codec.encode(&line).unwrap_or_else(|_| line.clone().into_bytes());
    if handle.data(id, CryptoVec::from_slice(&bytes)).await.is_err() {
        debug!("channel refused diagnostic line");
    }
}

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

//! The forwarder pair of a running session: two independent one-way
//! byte pumps. Each terminates exactly once, on source end-of-stream,
//! on any I/O or transport failure, or on cancellation. A failure is
//! never propagated to the peer beyond the normal closure the session
//! drives afterwards: one side going away must not get misreported as
//! a child failure or vice versa.

use russh::server::{Handle, Msg};
use russh::{Channel, ChannelId, ChannelMsg, CryptoVec};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::pipe;
use tokio::process::ChildStdin;
use tracing::{debug, trace};

use crate::consts;

/// Pump channel data into the child's stdin. Dropping the stdin handle
/// on the way out is what shows the child end-of-input.
pub async fn channel_to_stdin(mut channel: Channel<Msg>, mut stdin: ChildStdin) {
    loop {
        match channel.wait().await {
            Some(ChannelMsg::Data { data }) => {
                if let Err(e) = stdin.write_all(&data).await {
                    debug!("stdin write failed: {}", e);
                    break;
                }
                if let Err(e) = stdin.flush().await {
                    debug!("stdin flush failed: {}", e);
                    break;
                }
            }
            Some(ChannelMsg::Eof) | Some(ChannelMsg::Close) | None => break,
            Some(msg) => trace!("channel reader ignoring {:?}", msg),
        }
    }
    debug!("channel reader done");
}

/// Pump the child's merged stdout+stderr into the channel. Reads hand
/// back whatever bytes are already available, so interactive output is
/// forwarded as it appears rather than once a buffer fills. Closing
/// the channel is the session's job, never ours.
pub async fn pipe_to_channel(mut source: pipe::Receiver, handle: Handle, channel: ChannelId) {
    let mut buf = [0u8; consts::PROC_BUF_SIZE];
    loop {
        match source.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                if handle.data(channel, CryptoVec::from_slice(&buf[..n])).await.is_err() {
                    debug!("channel stopped accepting data");
                    break;
                }
            }
            Err(e) => {
                debug!("output pipe read failed: {}", e);
                break;
            }
        }
    }
    debug!("process reader done");
}

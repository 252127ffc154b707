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

// This module is used from multiple different test files, each of which
// gets compiled into its own binary. Not all the binaries use all the
// stuff here.
#![allow(dead_code)]

use std::time::Duration;

use anyhow::anyhow;

pub mod client;
pub mod daemon;

/// A hard ceiling on how long any single test may run; the timeout
/// tests sit out two full 10 second windows and still need headroom.
pub const TEST_DEADLINE: Duration = Duration::from_secs(60);

/// Spin with backoff until the predicate holds.
pub async fn wait_until<P>(mut pred: P) -> anyhow::Result<()>
where
    P: FnMut() -> bool,
{
    let mut sleep_dur = Duration::from_millis(5);
    for _ in 0..12 {
        if pred() {
            return Ok(());
        }
        tokio::time::sleep(sleep_dur).await;
        sleep_dur *= 2;
    }

    Err(anyhow!("pred never became true"))
}

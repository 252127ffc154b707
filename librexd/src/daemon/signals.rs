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

use std::sync::{atomic::AtomicBool, Arc};

use anyhow::Context;
use signal_hook::{consts::TERM_SIGNALS, flag};
use tracing::info;

/// Wire the term signals to the shutdown flag the presence sink gates
/// the supervisor on. The first signal flips the flag so live sessions
/// get drained; if someone mashes ^C a second signal exits immediately
/// rather than getting stuck in a graceful shutdown.
pub fn register(shutdown: Arc<AtomicBool>) -> anyhow::Result<()> {
    info!("registering term signal handlers");

    for sig in TERM_SIGNALS {
        // When terminated by a second term signal, exit with exit code 1.
        // This will do nothing the first time (because shutdown is false).
        flag::register_conditional_shutdown(*sig, 1, Arc::clone(&shutdown))
            .context("registering conditional shutdown")?;
        // But this will "arm" the above for the second time, by setting it to true.
        // The order of registering these is important, if you put this one first, it
        // will first arm and then terminate ‒ all in the first round.
        flag::register(*sig, Arc::clone(&shutdown)).context("registering shutdown flag")?;
    }

    Ok(())
}

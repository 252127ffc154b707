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

//! The host-facing seams of the daemon. The core only ever talks to
//! the machine it runs on through these three traits, so a front-end
//! (a systray, say) can plug in its own presence sink and tests can
//! swap the clipboard and shell-open integrations for recordings.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::Context;
use tracing::{debug, info};

/// Where session-level events surface to a user. `idle` doubles as the
/// supervisor's run-loop gate: serving continues while it returns true.
pub trait Presence: Send + Sync {
    fn set_busy(&self, _busy: bool) {}
    fn set_text(&self, _text: &str) {}
    fn notify(&self, _title: &str, _text: &str) {}
    fn idle(&self) -> bool {
        true
    }
}

/// The host clipboard, as plain text.
pub trait Clipboard: Send + Sync {
    fn get_text(&self) -> anyhow::Result<String>;
    fn set_text(&self, text: &str) -> anyhow::Result<()>;
}

/// The host shell-execute facility behind `@<verb>` commands.
pub trait Opener: Send + Sync {
    fn shell_open(&self, verb: &str, path: &Path) -> anyhow::Result<()>;
}

/// The bundle of host integrations handed to the daemon.
#[derive(Clone)]
pub struct Host {
    pub presence: Arc<dyn Presence>,
    pub clipboard: Arc<dyn Clipboard>,
    pub opener: Arc<dyn Opener>,
}

impl Host {
    /// The real integrations: a logging presence sink gated on the
    /// shutdown flag, the system clipboard, and the system opener.
    pub fn system(shutdown: Arc<AtomicBool>) -> Host {
        Host {
            presence: Arc::new(TracingPresence { shutdown }),
            clipboard: Arc::new(SystemClipboard),
            opener: Arc::new(SystemOpener),
        }
    }
}

/// A presence sink that just logs. Its `idle` gate is the term-signal
/// shutdown flag, so Ctrl-C drains sessions the same way a front-end
/// quitting would.
pub struct TracingPresence {
    shutdown: Arc<AtomicBool>,
}

impl Presence for TracingPresence {
    fn set_busy(&self, busy: bool) {
        debug!("presence: busy={}", busy);
    }

    fn set_text(&self, text: &str) {
        debug!("presence: {}", text.replace('\n', " "));
    }

    fn notify(&self, title: &str, text: &str) {
        info!("{}: {}", title, text);
    }

    fn idle(&self) -> bool {
        !self.shutdown.load(Ordering::Relaxed)
    }
}

/// The system clipboard. A connection is opened per call: clipboard
/// handles are not portable across threads on every platform, and on a
/// headless host construction fails cleanly instead of at startup.
pub struct SystemClipboard;

impl Clipboard for SystemClipboard {
    fn get_text(&self) -> anyhow::Result<String> {
        let mut clipboard = arboard::Clipboard::new().context("opening clipboard")?;
        clipboard.get_text().context("reading clipboard text")
    }

    fn set_text(&self, text: &str) -> anyhow::Result<()> {
        let mut clipboard = arboard::Clipboard::new().context("opening clipboard")?;
        clipboard.set_text(text).context("writing clipboard text")
    }
}

/// Shell-open through the desktop environment. The `open` verb maps to
/// the plain system opener; any other verb is handed over as the
/// program to open the path with, which is as close as unix gets to
/// shell-execute verbs.
pub struct SystemOpener;

impl Opener for SystemOpener {
    fn shell_open(&self, verb: &str, path: &Path) -> anyhow::Result<()> {
        if verb == "open" {
            open::that(path).with_context(|| format!("opening {:?}", path))
        } else {
            open::with(path, verb).with_context(|| format!("opening {:?} with '{}'", path, verb))
        }
    }
}

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
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use serde_derive::Deserialize;
use tracing::{info, instrument};

use crate::{codec::Codec, consts, user};

#[instrument(skip_all)]
pub fn read_config(config_file: &Option<String>) -> anyhow::Result<Config> {
    let mut config = Config::default();
    if let Some(config_path) = config_file {
        info!("parsing explicitly passed in config ({})", config_path);
        let config_str = fs::read_to_string(config_path).context("reading config toml (1)")?;
        config = toml::from_str(&config_str).context("parsing config file (1)")?;
    } else {
        let user_info = user::info()?;
        let mut config_path = user_info.home_dir;
        config_path.push(".config");
        config_path.push("rexd");
        config_path.push("config.toml");
        if config_path.exists() {
            let config_str = fs::read_to_string(config_path).context("reading config toml (2)")?;
            config = toml::from_str(&config_str).context("parsing config file (2)")?;
        }
    }

    Ok(config)
}

#[derive(Deserialize, Default, Debug, Clone)]
pub struct Config {
    /// The address the tcp listener binds, 127.0.0.1 by default.
    /// Set to 0.0.0.0 to accept connections from other machines.
    pub listen_addr: Option<String>,

    /// The port the tcp listener binds, 2200 by default.
    pub listen_port: Option<u16>,

    /// The one account name that may authenticate. Clients offering
    /// any other username are shown no authentication methods at all.
    /// Defaults to the user who started the daemon.
    pub username: Option<String>,

    /// Paths of authorized_keys files naming the public keys that may
    /// log in as `username`. One key per line, in the usual
    /// `<type> <base64> [comment]` form.
    pub authorized_keys: Option<Vec<PathBuf>>,

    /// Paths of host key files to present during key exchange. When
    /// unset, a key is generated under the state dir on first start.
    pub host_keys: Option<Vec<PathBuf>>,

    /// The working directory for every spawned command and the anchor
    /// for relative paths in `@<verb>` side-channel commands.
    /// Defaults to the daemon owner's home directory.
    pub working_dir: Option<PathBuf>,

    /// The shell invocation template as an argv list. A `shell`
    /// request spawns exactly this template; an `exec` request
    /// appends `shell_exec_flag` and the command string to it.
    /// Defaults to the daemon owner's login shell.
    pub shell: Option<Vec<String>>,

    /// The token inserted between the shell template and an exec
    /// command, "-c" by default.
    pub shell_exec_flag: Option<String>,

    /// The text encoding used to decode exec commands and
    /// side-channel payloads, "utf-8" by default. Any WHATWG
    /// encoding label works.
    pub codec: Option<String>,
}

/// Config with every default filled in. This is what the daemon
/// actually runs on.
#[derive(Debug, Clone)]
pub struct Settings {
    pub listen_addr: String,
    pub listen_port: u16,
    pub username: String,
    pub authorized_keys: Vec<PathBuf>,
    pub host_keys: Vec<PathBuf>,
    pub working_dir: PathBuf,
    pub shell: Vec<String>,
    pub shell_exec_flag: String,
    pub codec: Codec,
}

impl Config {
    pub fn resolve(&self, state_dir: &Path) -> anyhow::Result<Settings> {
        let user_info = user::info().context("resolving current user")?;

        let codec = Codec::new(self.codec.as_deref().unwrap_or("utf-8"))
            .context("resolving configured codec")?;

        Ok(Settings {
            listen_addr: self
                .listen_addr
                .clone()
                .unwrap_or_else(|| String::from(consts::DEFAULT_LISTEN_ADDR)),
            listen_port: self.listen_port.unwrap_or(consts::DEFAULT_PORT),
            username: self.username.clone().unwrap_or(user_info.username),
            authorized_keys: self
                .authorized_keys
                .clone()
                .unwrap_or_else(|| vec![state_dir.join(consts::AUTHORIZED_KEYS_FILE)]),
            host_keys: self.host_keys.clone().unwrap_or_default(),
            working_dir: self.working_dir.clone().unwrap_or(user_info.home_dir),
            shell: self.shell.clone().unwrap_or_else(|| vec![user_info.shell]),
            shell_exec_flag: self
                .shell_exec_flag
                .clone()
                .unwrap_or_else(|| String::from("-c")),
            codec,
        })
    }
}

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

use std::{env, fs, io, path::PathBuf, sync::Mutex};

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
pub use host::Host;
use tracing::error;
use tracing_subscriber::fmt::format::FmtSpan;

pub mod codec;
pub mod config;
pub mod consts;
pub mod daemon;
pub mod host;
pub mod keys;
mod user;

/// The command line arguments that rexd expects. These can be directly
/// parsed with clap or manually constructed in order to present some
/// other user interface.
///
/// NOTE: You must check `version()` and handle it yourself if it is
/// set. Clap won't do a good job with its automatic version support
/// for a library.
#[derive(Parser, Debug)]
#[clap(author, about)]
pub struct Args {
    #[clap(
        short,
        long,
        action,
        long_help = "The file to write logs to

By default logs go to stderr."
    )]
    pub log_file: Option<String>,

    #[clap(
        short,
        long,
        action = clap::ArgAction::Count,
        help = "Show more in logs, may be provided multiple times",
    )]
    pub verbose: u8,

    #[clap(short, long, action, help = "a toml file containing configuration")]
    pub config_file: Option<String>,

    #[clap(
        short,
        long,
        action,
        long_help = "The directory host keys and authorized_keys live in

This defaults to $XDG_STATE_HOME/rexd or ~/.rexd if XDG_STATE_HOME
is unset. A host key is generated here on first start if the config
does not name one."
    )]
    pub state_dir: Option<String>,

    #[clap(subcommand)]
    pub command: Commands,
}

/// The subcommands that rexd supports.
#[derive(Subcommand, Debug)]
pub enum Commands {
    #[clap(about = "Print version")]
    Version,

    #[clap(about = "Start the ssh remote-execution daemon")]
    Daemon {
        #[clap(short = 'L', long, help = "the address to listen on, 127.0.0.1 by default")]
        listen: Option<String>,

        #[clap(short, long, help = "the port to listen on, 2200 by default")]
        port: Option<u16>,

        #[clap(short, long, help = "the one account name that may authenticate")]
        username: Option<String>,

        #[clap(
            short,
            long,
            help = "an authorized_keys file with the public keys that may log in, repeatable"
        )]
        authorized_keys: Vec<PathBuf>,

        #[clap(long, help = "a host key file to present, repeatable")]
        host_key: Vec<PathBuf>,

        #[clap(short, long, help = "the working directory for spawned commands")]
        working_dir: Option<PathBuf>,
    },
}

impl Args {
    /// Version indicates if the wrapping binary must display the
    /// version then exit.
    pub fn version(&self) -> bool {
        matches!(self.command, Commands::Version)
    }
}

/// Run the rexd tool with the given arguments. If host is provided,
/// inject the presence/clipboard/opener integrations into the daemon.
pub fn run(args: Args, host: Option<Host>) -> anyhow::Result<()> {
    let trace_level = if args.verbose == 0 {
        tracing::Level::INFO
    } else if args.verbose == 1 {
        tracing::Level::DEBUG
    } else {
        tracing::Level::TRACE
    };
    if let Some(log_file) = args.log_file.clone() {
        let file = fs::File::create(log_file)?;
        tracing_subscriber::fmt()
            .with_max_level(trace_level)
            .with_thread_ids(true)
            .with_target(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(Mutex::new(file))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_max_level(trace_level)
            .with_thread_ids(true)
            .with_target(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(io::stderr)
            .init();
    }

    let state_dir = match &args.state_dir {
        Some(dir) => PathBuf::from(dir),
        None => match env::var("XDG_STATE_HOME") {
            Ok(state_home) => PathBuf::from(state_home).join("rexd"),
            Err(_) => {
                PathBuf::from(env::var("HOME").context("no XDG_STATE_HOME or HOME")?).join(".rexd")
            }
        },
    };

    let res: anyhow::Result<()> = match args.command {
        Commands::Version => return Err(anyhow!("wrapper binary must handle version")),
        Commands::Daemon { listen, port, username, authorized_keys, host_key, working_dir } => {
            let mut config = config::read_config(&args.config_file)?;
            if listen.is_some() {
                config.listen_addr = listen;
            }
            if port.is_some() {
                config.listen_port = port;
            }
            if username.is_some() {
                config.username = username;
            }
            if !authorized_keys.is_empty() {
                config.authorized_keys = Some(authorized_keys);
            }
            if !host_key.is_empty() {
                config.host_keys = Some(host_key);
            }
            if working_dir.is_some() {
                config.working_dir = working_dir;
            }
            daemon::run(config, state_dir, host)
        }
    };

    if let Err(err) = res {
        error!("{:?}", err);
        std::process::exit(1);
    }

    Ok(())
}

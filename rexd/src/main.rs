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

/// rexd is an ssh daemon for running commands on the host it is
/// started on. After public-key authentication a client can run
/// programs in the daemon owner's account, stream their merged
/// output, and drive the host clipboard or shell-open facility
/// through `@`-prefixed commands.
use clap::Parser;

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn main() -> anyhow::Result<()> {
    let args = librexd::Args::parse();

    if args.version() {
        println!("rexd {VERSION}");
        return Ok(());
    }

    librexd::run(args, None)
}

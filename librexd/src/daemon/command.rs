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

/// What the negotiated command string asks a session to do. `@`-prefixed
/// commands are intercepted by the session instead of reaching a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// A shell request: spawn the shell template with nothing appended.
    Shell,
    /// An ordinary exec request: run the command line under the shell
    /// template.
    Exec(String),
    /// Send the host clipboard text to the client.
    ClipGet,
    /// Replace the host clipboard text with the channel payload.
    ClipSet,
    /// Shell-open the path in the channel payload with the given verb.
    Open(String),
}

impl Command {
    pub fn parse(negotiated: Option<String>) -> Command {
        match negotiated {
            None => Command::Shell,
            Some(raw) => {
                if raw == "@clipget" {
                    Command::ClipGet
                } else if raw == "@clipset" {
                    Command::ClipSet
                } else if let Some(verb) = raw.strip_prefix('@') {
                    Command::Open(String::from(verb))
                } else {
                    Command::Exec(raw)
                }
            }
        }
    }
}

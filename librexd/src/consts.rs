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

use std::time;

/// How long a freshly shaken-hands transport gets to open its one
/// session channel before we tear it down.
pub const CHANNEL_ACCEPT_TIMEOUT: time::Duration = time::Duration::from_secs(10);

/// How long an open channel gets to issue a shell or exec request
/// before the session is discarded.
pub const SESSION_READY_TIMEOUT: time::Duration = time::Duration::from_secs(10);

/// How often the supervisor consults the presence sink even when no
/// connections or session events arrive.
pub const PRESENCE_PUMP_INTERVAL: time::Duration = time::Duration::from_millis(50);

/// Read chunk for the child-output pump. Reads return as soon as any
/// bytes are available, so this bounds a single forward without ever
/// holding output back for a full buffer.
pub const PROC_BUF_SIZE: usize = 4096;

/// Upper bound on a buffered side-channel payload (clipboard text or
/// a path to shell-open).
pub const MAX_RECV_BYTES: usize = 1024 * 1024;

pub const DEFAULT_PORT: u16 = 2200;
pub const DEFAULT_LISTEN_ADDR: &str = "127.0.0.1";

/// The host key file we generate when none is configured.
pub const GENERATED_HOST_KEY_FILE: &str = "ssh_host_key";
pub const AUTHORIZED_KEYS_FILE: &str = "authorized_keys";

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

use anyhow::anyhow;
use encoding_rs::Encoding;

/// The text encoding used for exec command strings, side-channel
/// payloads and clipboard traffic. Decoding and encoding are strict:
/// malformed input is an error, never a replacement character.
#[derive(Clone, Copy)]
pub struct Codec {
    encoding: &'static Encoding,
}

impl Codec {
    /// Resolve a WHATWG encoding label like "utf-8" or "shift_jis".
    pub fn new(label: &str) -> anyhow::Result<Codec> {
        let encoding = Encoding::for_label(label.as_bytes())
            .ok_or_else(|| anyhow!("unknown text encoding '{}'", label))?;
        Ok(Codec { encoding })
    }

    pub fn name(&self) -> &'static str {
        self.encoding.name()
    }

    pub fn decode(&self, bytes: &[u8]) -> anyhow::Result<String> {
        let (text, had_errors) = self.encoding.decode_without_bom_handling(bytes);
        if had_errors {
            return Err(anyhow!("cannot decode bytes as {}", self.name()));
        }
        Ok(text.into_owned())
    }

    pub fn encode(&self, text: &str) -> anyhow::Result<Vec<u8>> {
        let (bytes, _, had_errors) = self.encoding.encode(text);
        if had_errors {
            return Err(anyhow!("cannot encode text as {}", self.name()));
        }
        Ok(bytes.into_owned())
    }
}

impl Default for Codec {
    fn default() -> Self {
        Codec { encoding: encoding_rs::UTF_8 }
    }
}

impl std::fmt::Debug for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Codec({})", self.name())
    }
}

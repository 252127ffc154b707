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
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use anyhow::{anyhow, Context};
use russh_keys::key::{KeyPair, PublicKey};
use tracing::{debug, info, instrument};

/// Load every usable public key from the given authorized_keys files.
/// Files that don't exist are skipped so a default path can be probed;
/// an unreadable file that does exist is an error.
#[instrument(skip_all)]
pub fn load_authorized_keys(paths: &[PathBuf]) -> anyhow::Result<Vec<PublicKey>> {
    let mut keys = vec![];
    for path in paths.iter() {
        if !path.is_file() {
            debug!("no authorized_keys file at {:?}", path);
            continue;
        }
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading authorized_keys file {:?}", path))?;
        for line in contents.lines() {
            if let Some(key) = parse_authorized_key(line) {
                keys.push(key);
            }
        }
        info!("loaded authorized keys from {:?}", path);
    }
    Ok(keys)
}

/// One `<type> <base64> [comment]` line. Lines with fewer than two
/// fields or an unrecognized type token are skipped silently; a
/// recognized line the library can't parse is skipped with a log.
fn parse_authorized_key(line: &str) -> Option<PublicKey> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return None;
    }
    let mut fields = line.split_whitespace();
    let keytype = fields.next()?;
    let blob = fields.next()?;
    let recognized = matches!(keytype, "ssh-rsa" | "ssh-dss" | "ssh-ed25519")
        || keytype.starts_with("ecdsa-");
    if !recognized {
        return None;
    }
    match russh_keys::parse_public_key_base64(blob) {
        Ok(key) => Some(key),
        Err(e) => {
            // ssh-dss in particular lands here: the transport library
            // has no dsa support, so such clients could never finish a
            // key exchange anyway.
            debug!("skipping unusable {} key: {}", keytype, e);
            None
        }
    }
}

/// Load the configured host keys. Unlike authorized_keys, a missing or
/// unparsable host key file is fatal: presenting fewer identities than
/// configured would be silently wrong. The format is detected by the
/// parser itself, not by the file name.
#[instrument(skip_all)]
pub fn load_host_keys(paths: &[PathBuf]) -> anyhow::Result<Vec<KeyPair>> {
    let mut keys = vec![];
    for path in paths.iter() {
        let key = russh_keys::load_secret_key(path, None)
            .with_context(|| format!("loading host key {:?}", path))?;
        keys.push(key);
    }
    Ok(keys)
}

/// Load the generated host key from the state dir, creating it on
/// first start.
#[instrument(skip_all)]
pub fn ensure_host_key(path: &Path) -> anyhow::Result<KeyPair> {
    if path.is_file() {
        return russh_keys::load_secret_key(path, None)
            .with_context(|| format!("loading generated host key {:?}", path));
    }

    let dir = path.parent().ok_or_else(|| anyhow!("host key path {:?} has no parent", path))?;
    fs::create_dir_all(dir).with_context(|| format!("creating state dir {:?}", dir))?;

    let key = KeyPair::generate_ed25519().expect("ed25519 key generation is infallible");
    let file = fs::File::create(path).with_context(|| format!("creating host key {:?}", path))?;
    russh_keys::encode_pkcs8_pem(&key, &file).context("writing host key")?;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .context("restricting host key permissions")?;

    let fingerprint = key.clone_public_key().context("deriving host public key")?.fingerprint();
    info!("generated host key {:?} with fingerprint {}", path, fingerprint);
    Ok(key)
}

#[cfg(test)]
mod test {
    use super::*;
    use ntest::timeout;
    use russh_keys::PublicKeyBase64;

    #[test]
    #[timeout(30000)]
    fn parse_skips_junk_lines() -> anyhow::Result<()> {
        let key = KeyPair::generate_ed25519().expect("ed25519 key generation is infallible");
        let pubkey = key.clone_public_key()?;
        let contents = format!(
            "# a comment\n\
             \n\
             short\n\
             made-up-type AAAA nobody@example.com\n\
             {} {} test@host\n\
             ssh-rsa not!base64 broken@host\n",
            pubkey.name(),
            pubkey.public_key_base64(),
        );

        let dir = tempfile::tempdir()?;
        let path = dir.path().join("authorized_keys");
        fs::write(&path, contents)?;

        let keys = load_authorized_keys(&[path])?;
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].public_key_bytes(), pubkey.public_key_bytes());
        Ok(())
    }

    #[test]
    #[timeout(30000)]
    fn missing_files_are_skipped() -> anyhow::Result<()> {
        let keys = load_authorized_keys(&[PathBuf::from("/definitely/not/a/file")])?;
        assert!(keys.is_empty());
        Ok(())
    }

    #[test]
    #[timeout(30000)]
    fn generated_host_key_round_trips() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("state").join("ssh_host_key");

        let generated = ensure_host_key(&path)?;
        let reloaded = ensure_host_key(&path)?;
        assert_eq!(
            generated.clone_public_key()?.public_key_bytes(),
            reloaded.clone_public_key()?.public_key_bytes(),
        );
        Ok(())
    }
}

//! Durable device storage seam.
//!
//! Secrets and the cached chip identity live in the device's flash store,
//! addressed by well-known paths. The store itself (filesystem, wear
//! levelling, encryption at rest) is an external collaborator.

use littlefs2_core::{path, Path};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::channel::KEY_LEN;
use crate::se::ChipIdentity;
use crate::Error;

/// Identity record of the chip this device first paired with.
pub const CHIP_IDENTITY_PATH: &Path = path!("chip-identity");
/// Host pairing secrets, one X25519 scalar each.
pub const UNPRIVILEGED_KEY_PATH: &Path = path!("pairing-unprivileged");
pub const PRIVILEGED_KEY_PATH: &Path = path!("pairing-privileged");
/// Device secret for sealing extracted material toward the backend.
pub const EXTRACTION_KEY_PATH: &Path = path!("extraction");

const IDENTITY_BUF_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    NotFound,
    Io,
}

pub trait SecretStore {
    /// Read the entry at `path` into `buf`, returning its length.
    fn read(&mut self, path: &Path, buf: &mut [u8]) -> Result<usize, StoreError>;
    fn write(&mut self, path: &Path, data: &[u8]) -> Result<(), StoreError>;
}

pub fn cached_identity<S: SecretStore>(store: &mut S) -> Result<Option<ChipIdentity>, Error> {
    let mut buf = [0u8; IDENTITY_BUF_LEN];
    let len = match store.read(CHIP_IDENTITY_PATH, &mut buf) {
        Ok(len) => len,
        Err(StoreError::NotFound) => return Ok(None),
        Err(StoreError::Io) => return Err(Error::Storage),
    };
    let identity = cbor_smol::cbor_deserialize(&buf[..len]).map_err(|_err| {
        error!("corrupt cached chip identity: {:?}", _err);
        Error::Storage
    })?;
    Ok(Some(identity))
}

pub fn cache_identity<S: SecretStore>(store: &mut S, identity: &ChipIdentity) -> Result<(), Error> {
    let mut buf = [0u8; IDENTITY_BUF_LEN];
    let data =
        cbor_smol::cbor_serialize(identity, &mut buf).map_err(|_| Error::Storage)?;
    store.write(CHIP_IDENTITY_PATH, data)?;
    Ok(())
}

/// Load a 32-byte secret scalar.
pub fn secret_key<S: SecretStore>(store: &mut S, path: &Path) -> Result<[u8; KEY_LEN], Error> {
    let mut key = [0u8; KEY_LEN];
    let len = store.read(path, &mut key)?;
    if len != KEY_LEN {
        error!("secret at {:?} has length {}", path, len);
        return Err(Error::Storage);
    }
    Ok(key)
}

/// Load a secret scalar together with its public key.
pub fn keypair<S: SecretStore>(
    store: &mut S,
    path: &Path,
) -> Result<([u8; KEY_LEN], [u8; KEY_LEN]), Error> {
    let secret = secret_key(store, path)?;
    let public = PublicKey::from(&StaticSecret::from(secret)).to_bytes();
    Ok((secret, public))
}

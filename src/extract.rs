//! Sealing extracted secrets toward the manufacturing backend.
//!
//! At the end of test the device hands sensitive material (seeds, logs of
//! the provisioning run) to the backend. The backend's receiving keys
//! rotate; the device opens a [`channel`](crate::channel) session as the
//! initiator and tries every currently published backend key. Sealed
//! secrets travel in L3-shaped frames so the backend can reuse the chip
//! frame codec.

use hex_literal::hex;
use rand::{CryptoRng, RngCore};

use crate::channel::{Session, HANDSHAKE_REQUEST_LEN, HANDSHAKE_RESPONSE_LEN, KEY_LEN};
use crate::frame;
use crate::store::{self, SecretStore, EXTRACTION_KEY_PATH};
use crate::Error;

/// Backend static keys currently in rotation. The backend holds the secret
/// half of at least one of these.
pub const BACKEND_KEYS: [[u8; KEY_LEN]; 3] = [
    hex!("7A 8E 1D B0 29 5C C3 94 0D E2 67 3F 5B A8 11 F6 C0 93 4E 72 D5 08 AF 61 BC 2A 99 E4 36 50 8B 1F"),
    hex!("3C 52 F7 08 9B D4 6E A1 50 C8 2D 97 E3 1A B6 4F 08 D1 75 EA 32 BF 96 0C 64 E8 5D 13 AA 07 C9 62"),
    hex!("91 0F 6B D8 44 A7 2E C5 B3 78 01 9C EF 56 AD 20 8F 34 C1 6A 05 DB 48 F2 17 BE 83 5A 6C E0 29 D4"),
];

/// One extraction channel toward the backend.
pub struct Extraction {
    session: Session,
}

impl Extraction {
    /// Open a channel attempt and return the handshake request to send to
    /// the backend.
    pub fn begin<R: CryptoRng + RngCore>(rng: &mut R) -> (Self, [u8; HANDSHAKE_REQUEST_LEN]) {
        let mut session = Session::new();
        let request = session.handshake_1(rng);
        (Self { session }, request)
    }

    /// Process the backend's handshake response against the rotating key
    /// set. Returns `false` when no key in rotation authenticates it.
    pub fn complete<S: SecretStore>(
        &mut self,
        store: &mut S,
        response: &[u8; HANDSHAKE_RESPONSE_LEN],
    ) -> Result<bool, Error> {
        self.complete_with(store, response, &BACKEND_KEYS)
    }

    /// As [`complete`](Self::complete) with an explicit candidate set; the
    /// keys in rotation are deployment-specific.
    pub fn complete_with<S: SecretStore>(
        &mut self,
        store: &mut S,
        response: &[u8; HANDSHAKE_RESPONSE_LEN],
        candidates: &[[u8; KEY_LEN]],
    ) -> Result<bool, Error> {
        let secret = store::secret_key(store, EXTRACTION_KEY_PATH)?;
        self.session.handshake_2(response, &secret, candidates)
    }

    /// Seal one secret into an L3-shaped frame: little-endian length,
    /// ciphertext, tag.
    pub fn seal(
        &mut self,
        secret: &[u8],
        associated_data: &[u8],
        out: &mut [u8],
    ) -> Result<usize, Error> {
        if secret.len() > usize::from(u16::MAX) {
            return Err(Error::Param);
        }
        if out.len() < secret.len() + frame::L3_OVERHEAD {
            return Err(Error::Param);
        }
        out[..2].copy_from_slice(&(secret.len() as u16).to_le_bytes());
        let sealed = self.session.encrypt(secret, associated_data, &mut out[2..])?;
        Ok(2 + sealed)
    }
}

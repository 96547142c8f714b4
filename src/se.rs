//! Boundary to the SE21x driver.
//!
//! The bus transport and the chip's native command encoding live outside
//! this crate; [`Se21x`] is the set of primitive operations the
//! provisioning flows need. Implementations perform one blocking
//! request/response exchange per call against a half-duplex bus, so callers
//! must serialize access externally.

use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_byte_array::ByteArray;

use crate::channel::{Session, HANDSHAKE_REQUEST_LEN, HANDSHAKE_RESPONSE_LEN, KEY_LEN};
use crate::config::CONFIG_WORDS;
use crate::Error;

/// Endorsement challenge length.
pub const CHALLENGE_LEN: usize = 32;
/// Ed25519 endorsement signature length.
pub const SIGNATURE_LEN: usize = 64;
/// User-memory geometry.
pub const MEM_SLOT_COUNT: u16 = 512;
pub const MEM_SLOT_CAPACITY: usize = 444;

/// Pairing-key slot indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PairingSlot {
    /// Holds the well-known factory key on fresh chips; invalidated at the
    /// end of pairing.
    Factory = 0,
    Unprivileged = 1,
    Privileged = 2,
    Spare = 3,
}

impl PairingSlot {
    pub const ALL: [PairingSlot; 4] = [
        PairingSlot::Factory,
        PairingSlot::Unprivileged,
        PairingSlot::Privileged,
        PairingSlot::Spare,
    ];
}

/// State of a pairing-key slot as reported by the chip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySlotState {
    Empty,
    Occupied([u8; KEY_LEN]),
    Invalidated,
}

/// Outcome of a write to write-once chip storage.
///
/// `AlreadyWritten` is the idempotent no-op case: the chip refused to touch
/// existing content. It is not an error; callers decide success by readback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    Written,
    AlreadyWritten,
}

/// Driver-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeError {
    /// Bus failure; the chip is unreachable.
    Io,
    /// The chip answered with an error status.
    Status(u8),
}

/// Identity record extracted from the chip's certificate chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChipIdentity {
    /// Static X25519 key; the responder key of every pairing-slot session.
    pub exchange: ByteArray<KEY_LEN>,
    /// Ed25519 key the chip endorses challenges with.
    pub attestation: ByteArray<KEY_LEN>,
}

pub trait Se21x {
    /// Identity from the certificate chain.
    fn identity(&mut self) -> Result<ChipIdentity, SeError>;
    /// Sign a challenge with the attestation key.
    fn endorse(&mut self, challenge: &[u8; CHALLENGE_LEN]) -> Result<[u8; SIGNATURE_LEN], SeError>;

    /// One round of the secure-channel handshake against a pairing-key slot.
    /// Replaces any previously active chip-side session.
    fn handshake(
        &mut self,
        slot: PairingSlot,
        request: &[u8; HANDSHAKE_REQUEST_LEN],
        response: &mut [u8; HANDSHAKE_RESPONSE_LEN],
    ) -> Result<(), SeError>;
    /// Drop the active chip-side session, if any.
    fn invalidate_session(&mut self) -> Result<(), SeError>;

    fn pairing_key_read(&mut self, slot: PairingSlot) -> Result<KeySlotState, SeError>;
    fn pairing_key_write(
        &mut self,
        slot: PairingSlot,
        key: &[u8; KEY_LEN],
    ) -> Result<WriteOutcome, SeError>;
    fn pairing_key_invalidate(&mut self, slot: PairingSlot) -> Result<(), SeError>;

    fn r_config_erase(&mut self) -> Result<(), SeError>;
    fn r_config_write(&mut self, words: &[u32; CONFIG_WORDS]) -> Result<(), SeError>;
    fn r_config_read(&mut self) -> Result<[u32; CONFIG_WORDS], SeError>;
    /// One-shot commit; a second write reports `AlreadyWritten`.
    fn i_config_write(&mut self, words: &[u32; CONFIG_WORDS]) -> Result<WriteOutcome, SeError>;
    fn i_config_read(&mut self) -> Result<[u32; CONFIG_WORDS], SeError>;

    fn mem_erase(&mut self, slot: u16) -> Result<(), SeError>;
    fn mem_write(&mut self, slot: u16, data: &[u8]) -> Result<(), SeError>;
    fn mem_read(&mut self, slot: u16, buf: &mut [u8]) -> Result<usize, SeError>;

    /// Raw L2 exchange for relayed operator frames. The frame is forwarded
    /// unchanged; the return value is the received response length.
    fn l2_transfer(&mut self, request: &[u8], response: &mut [u8]) -> Result<usize, SeError>;
    /// Raw exchange of an L3 frame through the active chip-side session.
    fn l3_transfer(&mut self, frame: &[u8], response: &mut [u8]) -> Result<usize, SeError>;
}

/// Drive a [`Session`] handshake against a pairing-key slot.
///
/// `Ok(None)` means the chip refused the slot or the response did not
/// authenticate against `chip_static`; both leave the chip usable. Bus
/// failures surface as [`Error::Transport`].
pub fn try_session<SE: Se21x, R: CryptoRng + RngCore>(
    se: &mut SE,
    rng: &mut R,
    slot: PairingSlot,
    host_static: &[u8; KEY_LEN],
    chip_static: &[u8; KEY_LEN],
) -> Result<Option<Session>, Error> {
    let mut session = Session::new();
    let request = session.handshake_1(rng);
    let mut response = [0u8; HANDSHAKE_RESPONSE_LEN];
    match se.handshake(slot, &request, &mut response) {
        Ok(()) => {}
        Err(SeError::Status(_status)) => {
            debug!("handshake with {:?} refused: {:#04x}", slot, _status);
            return Ok(None);
        }
        Err(SeError::Io) => return Err(Error::Transport),
    }
    if session.handshake_2(&response, host_static, &[*chip_static])? {
        Ok(Some(session))
    } else {
        Ok(None)
    }
}

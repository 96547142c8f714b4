//! Access-permission configuration and the one-shot lock.
//!
//! Each category of chip operation has one 32-bit permission word with one
//! allow bit per pairing-key slot. The words live in two chip-resident
//! blocks: the reversible block can be erased and rewritten, the
//! irreversible block fuses on first write. The chip grants an operation
//! only if both blocks allow it for the session's slot.
//!
//! The table below is the authoritative form; the wire words are generated
//! from it. `lock` decides success by reading both blocks back, so a re-run
//! on an already locked chip succeeds without ever charging the fuse twice.

use bitflags::bitflags;
use rand::{CryptoRng, RngCore};

use crate::pairing;
use crate::se::{try_session, PairingSlot, Se21x, SeError, WriteOutcome};
use crate::store::{self, SecretStore, PRIVILEGED_KEY_PATH, UNPRIVILEGED_KEY_PATH};
use crate::Error;

/// One permission word per category.
pub const CONFIG_WORDS: usize = UapCategory::ALL.len();

bitflags! {
    /// Per-word allow bits, one per pairing-key slot.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SlotMask: u32 {
        const FACTORY = 1 << 0;
        const UNPRIVILEGED = 1 << 1;
        const PRIVILEGED = 1 << 2;
        const SPARE = 1 << 3;
    }
}

impl SlotMask {
    pub const fn for_slot(slot: PairingSlot) -> Self {
        match slot {
            PairingSlot::Factory => Self::FACTORY,
            PairingSlot::Unprivileged => Self::UNPRIVILEGED,
            PairingSlot::Privileged => Self::PRIVILEGED,
            PairingSlot::Spare => Self::SPARE,
        }
    }
}

/// Access-privilege categories, in wire-word order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UapCategory {
    PairingKeyRead = 0,
    PairingKeyWrite = 1,
    PairingKeyInvalidate = 2,
    RConfigRead = 3,
    RConfigWrite = 4,
    RConfigErase = 5,
    IConfigRead = 6,
    IConfigWrite = 7,
    MemRead = 8,
    MemWrite = 9,
    MemErase = 10,
    Endorse = 11,
}

impl UapCategory {
    pub const ALL: [UapCategory; 12] = [
        UapCategory::PairingKeyRead,
        UapCategory::PairingKeyWrite,
        UapCategory::PairingKeyInvalidate,
        UapCategory::RConfigRead,
        UapCategory::RConfigWrite,
        UapCategory::RConfigErase,
        UapCategory::IConfigRead,
        UapCategory::IConfigWrite,
        UapCategory::MemRead,
        UapCategory::MemWrite,
        UapCategory::MemErase,
        UapCategory::Endorse,
    ];

    pub const fn word(self) -> usize {
        self as usize
    }
}

/// Which pairing-key slots may invoke each category of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessMatrix([SlotMask; CONFIG_WORDS]);

impl AccessMatrix {
    pub const fn allowed(&self, category: UapCategory, slot: PairingSlot) -> bool {
        self.0[category.word()].contains(SlotMask::for_slot(slot))
    }

    /// The wire form committed to the chip.
    pub fn to_words(&self) -> [u32; CONFIG_WORDS] {
        let mut words = [0u32; CONFIG_WORDS];
        for (word, mask) in words.iter_mut().zip(self.0.iter()) {
            *word = mask.bits();
        }
        words
    }
}

const OPERATOR: SlotMask = SlotMask::UNPRIVILEGED.union(SlotMask::PRIVILEGED);
const ADMIN: SlotMask = SlotMask::PRIVILEGED;

/// The permission table committed by [`lock`]. The factory and spare slots
/// keep no rights at all; administrative operations need the privileged key.
pub const CANONICAL: AccessMatrix = AccessMatrix([
    OPERATOR, // PairingKeyRead
    ADMIN,    // PairingKeyWrite
    ADMIN,    // PairingKeyInvalidate
    OPERATOR, // RConfigRead
    ADMIN,    // RConfigWrite
    ADMIN,    // RConfigErase
    OPERATOR, // IConfigRead
    ADMIN,    // IConfigWrite
    OPERATOR, // MemRead
    OPERATOR, // MemWrite
    ADMIN,    // MemErase
    OPERATOR, // Endorse
]);

/// Lock state as far as it can be determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockState {
    /// Both blocks read back equal to the canonical table under a
    /// privileged session.
    Locked,
    /// Pairing or the lock has evidently not completed; running the missing
    /// step is the remedy.
    Unlocked,
    /// Communication failed. Nothing about the lock state may be concluded,
    /// and in particular this is no license to run [`lock`].
    Error,
}

/// Commit the canonical table to both configuration blocks.
///
/// Requires the paired end state. Idempotent: on an already locked chip the
/// same writes and readbacks run again and succeed, the fused block simply
/// reports the write as already done.
pub fn lock<SE: Se21x, S: SecretStore, R: CryptoRng + RngCore>(
    se: &mut SE,
    store: &mut S,
    rng: &mut R,
) -> Result<(), Error> {
    let identity = pairing::verified_identity(se, store)?;
    let (unprivileged_secret, _) = store::keypair(store, UNPRIVILEGED_KEY_PATH)?;
    let (privileged_secret, _) = store::keypair(store, PRIVILEGED_KEY_PATH)?;
    if !pairing::paired_state(se, rng, &identity, &unprivileged_secret, &privileged_secret)? {
        error!("refusing to lock an unpaired chip");
        return Err(Error::NotPaired);
    }

    if try_session(se, rng, PairingSlot::Privileged, &privileged_secret, &identity.exchange)?
        .is_none()
    {
        error!("privileged session refused after the paired state verified");
        return Err(Error::Transport);
    }

    let words = CANONICAL.to_words();

    se.r_config_erase()?;
    se.r_config_write(&words)?;
    if se.r_config_read()? != words {
        error!("reversible block readback mismatch");
        return Err(Error::VerificationMismatch);
    }
    debug!("reversible block committed");

    match se.i_config_write(&words)? {
        WriteOutcome::Written => {
            debug!("irreversible block written");
        }
        WriteOutcome::AlreadyWritten => {
            debug!("irreversible block already fused");
        }
    }
    if se.i_config_read()? != words {
        error!("irreversible block readback mismatch");
        return Err(Error::VerificationMismatch);
    }
    info!("configuration locked");
    Ok(())
}

/// Determine the lock state without touching either configuration block.
pub fn is_locked<SE: Se21x, S: SecretStore, R: CryptoRng + RngCore>(
    se: &mut SE,
    store: &mut S,
    rng: &mut R,
) -> LockState {
    match lock_state(se, store, rng) {
        Ok(state) => state,
        Err(_err) => {
            debug!("lock-state query failed: {:?}", _err);
            LockState::Error
        }
    }
}

fn lock_state<SE: Se21x, S: SecretStore, R: CryptoRng + RngCore>(
    se: &mut SE,
    store: &mut S,
    rng: &mut R,
) -> Result<LockState, Error> {
    let identity = pairing::verified_identity(se, store)?;
    let (privileged_secret, _) = store::keypair(store, PRIVILEGED_KEY_PATH)?;
    if try_session(se, rng, PairingSlot::Privileged, &privileged_secret, &identity.exchange)?
        .is_none()
    {
        // pairing evidently incomplete
        return Ok(LockState::Unlocked);
    }

    let words = CANONICAL.to_words();
    let reversible = match se.r_config_read() {
        Ok(block) => block,
        Err(SeError::Io) => return Err(Error::Transport),
        Err(SeError::Status(_status)) => {
            debug!("reversible block unreadable: {:#04x}", _status);
            return Err(Error::Transport);
        }
    };
    let irreversible = se.i_config_read()?;
    if reversible == words && irreversible == words {
        Ok(LockState::Locked)
    } else {
        Ok(LockState::Unlocked)
    }
}

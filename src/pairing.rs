//! Pairing the host device to its SE21x.
//!
//! Fresh chips accept sessions through the factory slot, whose keypair is
//! printed in the datasheet. Pairing installs this device's unprivileged and
//! privileged keys, invalidates the factory key, and from then on the chip
//! only talks to this device.
//!
//! No step records local progress. `pair` converges from any intermediate
//! chip state because every write is idempotent and the only authoritative
//! check is the end-state verification at the end of the run; re-running
//! after a crash or power loss is the supported recovery path.

use ed25519_dalek::{Signature, VerifyingKey};
use hex_literal::hex;
use rand::{CryptoRng, RngCore};

use crate::channel::KEY_LEN;
use crate::se::{
    try_session, ChipIdentity, KeySlotState, PairingSlot, Se21x, WriteOutcome, CHALLENGE_LEN,
};
use crate::store::{self, SecretStore, PRIVILEGED_KEY_PATH, UNPRIVILEGED_KEY_PATH};
use crate::Error;

/// Factory default pairing secret, shared by all fresh SE21x chips.
pub const FACTORY_SECRET: [u8; KEY_LEN] =
    hex!("D0 61 E5 9F 73 2A 18 34 37 BE 74 81 CC 5F 05 0F F8 43 F1 01 51 65 6F E9 E4 1A 96 A5 7A 74 43 49");

/// The endorsement challenge used during identity verification. A constant
/// is sufficient here: the check guards against a swapped chip, not against
/// replay by an attacker with bus access.
const ZERO_CHALLENGE: [u8; CHALLENGE_LEN] = [0; CHALLENGE_LEN];

/// Pair this device with the attached chip.
///
/// Safe to call any number of times; a fully paired chip verifies cleanly
/// and nothing is rewritten.
pub fn pair<SE: Se21x, S: SecretStore, R: CryptoRng + RngCore>(
    se: &mut SE,
    store: &mut S,
    rng: &mut R,
) -> Result<(), Error> {
    let identity = verified_identity(se, store)?;
    let (unprivileged_secret, unprivileged_public) = store::keypair(store, UNPRIVILEGED_KEY_PATH)?;
    let (privileged_secret, privileged_public) = store::keypair(store, PRIVILEGED_KEY_PATH)?;

    match try_session(se, rng, PairingSlot::Factory, &FACTORY_SECRET, &identity.exchange)? {
        Some(_session) => {
            info!("factory session established, installing device keys");
            write_pairing_key(se, PairingSlot::Privileged, &privileged_public)?;
            write_pairing_key(se, PairingSlot::Unprivileged, &unprivileged_public)?;
            se.pairing_key_invalidate(PairingSlot::Factory)?;
            debug!("factory key invalidated");
        }
        None => {
            debug!("factory session refused, assuming pairing already under way");
        }
    }

    if !paired_state(se, rng, &identity, &unprivileged_secret, &privileged_secret)? {
        error!("chip did not reach the paired end state");
        return Err(Error::VerificationMismatch);
    }
    info!("pairing complete");
    Ok(())
}

/// Whether the chip currently is in the paired end state.
///
/// Derived from chip state on every call; nothing is cached across
/// invocations or power cycles.
pub fn is_paired<SE: Se21x, S: SecretStore, R: CryptoRng + RngCore>(
    se: &mut SE,
    store: &mut S,
    rng: &mut R,
) -> Result<bool, Error> {
    let identity = verified_identity(se, store)?;
    let (unprivileged_secret, _) = store::keypair(store, UNPRIVILEGED_KEY_PATH)?;
    let (privileged_secret, _) = store::keypair(store, PRIVILEGED_KEY_PATH)?;
    paired_state(se, rng, &identity, &unprivileged_secret, &privileged_secret)
}

/// Install `public` into `slot`, tolerating a slot that already holds it.
///
/// The chip refusing to overwrite an occupied slot is expected on re-runs;
/// the readback decides. A slot holding different key material is never
/// silently overwritten.
pub fn write_pairing_key<SE: Se21x>(
    se: &mut SE,
    slot: PairingSlot,
    public: &[u8; KEY_LEN],
) -> Result<(), Error> {
    match se.pairing_key_write(slot, public)? {
        WriteOutcome::Written => {
            debug!("wrote pairing key into {:?}", slot);
        }
        WriteOutcome::AlreadyWritten => {
            debug!("pairing key {:?} already present", slot);
        }
    }
    match se.pairing_key_read(slot)? {
        KeySlotState::Occupied(stored) if stored == *public => Ok(()),
        _state => {
            error!("pairing key {:?} readback mismatch: {:?}", slot, _state);
            Err(Error::VerificationMismatch)
        }
    }
}

/// Read the chip identity, endorse-check it and compare it against the
/// cached copy in device storage. The first chip ever seen is cached; any
/// later divergence means the wrong physical chip is attached.
pub(crate) fn verified_identity<SE: Se21x, S: SecretStore>(
    se: &mut SE,
    store: &mut S,
) -> Result<ChipIdentity, Error> {
    let identity = se.identity()?;

    let signature = se.endorse(&ZERO_CHALLENGE)?;
    let key = VerifyingKey::from_bytes(&identity.attestation).map_err(|_err| {
        error!("attestation key is not a valid Ed25519 point: {:?}", _err);
        Error::VerificationMismatch
    })?;
    key.verify_strict(&ZERO_CHALLENGE, &Signature::from_bytes(&signature))
        .map_err(|_err| {
            error!("endorsement check failed: {:?}", _err);
            Error::VerificationMismatch
        })?;

    match store::cached_identity(store)? {
        None => {
            info!("caching identity of first-seen chip");
            store::cache_identity(store, &identity)?;
        }
        Some(cached) if cached == identity => {}
        Some(_cached) => {
            error!("attached chip does not match the cached identity");
            return Err(Error::VerificationMismatch);
        }
    }
    Ok(identity)
}

pub(crate) fn paired_state<SE: Se21x, R: CryptoRng + RngCore>(
    se: &mut SE,
    rng: &mut R,
    identity: &ChipIdentity,
    unprivileged_secret: &[u8; KEY_LEN],
    privileged_secret: &[u8; KEY_LEN],
) -> Result<bool, Error> {
    if try_session(se, rng, PairingSlot::Unprivileged, unprivileged_secret, &identity.exchange)?
        .is_none()
    {
        debug!("unprivileged session did not establish");
        return Ok(false);
    }
    if try_session(se, rng, PairingSlot::Privileged, privileged_secret, &identity.exchange)?
        .is_none()
    {
        debug!("privileged session did not establish");
        return Ok(false);
    }
    let factory = se.pairing_key_read(PairingSlot::Factory)?;
    if factory != KeySlotState::Invalidated {
        debug!("factory slot is {:?}", factory);
        return Ok(false);
    }
    let spare = se.pairing_key_read(PairingSlot::Spare)?;
    if spare != KeySlotState::Empty {
        debug!("spare slot is {:?}", spare);
        return Ok(false);
    }
    Ok(true)
}

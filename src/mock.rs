//! Simulated SE21x and RAM-backed secret store for tests.
//!
//! The simulator persists pairing-key slots, both configuration blocks and
//! the user memory, answers the responder half of the channel handshake and
//! enforces the committed permission words once the irreversible block is
//! fused. Counters record bus activity so tests can assert what a re-run
//! did not touch.

use std::collections::BTreeMap;

use ed25519_dalek::{Signer, SigningKey};
use littlefs2_core::Path;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_byte_array::ByteArray;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::channel::{self, HANDSHAKE_REQUEST_LEN, HANDSHAKE_RESPONSE_LEN, KEY_LEN};
use crate::config::{SlotMask, UapCategory, CONFIG_WORDS};
use crate::pairing::FACTORY_SECRET;
use crate::se::{
    ChipIdentity, KeySlotState, PairingSlot, Se21x, SeError, WriteOutcome, CHALLENGE_LEN,
    MEM_SLOT_CAPACITY, MEM_SLOT_COUNT, SIGNATURE_LEN,
};
use crate::store::{
    SecretStore, StoreError, EXTRACTION_KEY_PATH, PRIVILEGED_KEY_PATH, UNPRIVILEGED_KEY_PATH,
};

pub(crate) const STATUS_UNKNOWN_KEY: u8 = 0x75;
pub(crate) const STATUS_NO_SESSION: u8 = 0x79;
pub(crate) const STATUS_UNAUTHORIZED: u8 = 0x7a;
pub(crate) const STATUS_BAD_PARAM: u8 = 0x7c;

/// Relayed handshake opcode understood by the simulator's L2 endpoint.
pub(crate) const OP_HANDSHAKE: u8 = 0x02;

const ERASED_WORD: u32 = 0xffff_ffff;
const ERASED_BYTE: u8 = 0xff;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SimSlot {
    Empty,
    Occupied([u8; KEY_LEN]),
    Invalidated,
}

pub(crate) struct SimChip {
    rng: ChaCha8Rng,
    exchange_secret: StaticSecret,
    attestation: SigningKey,
    pub(crate) slots: [SimSlot; 4],
    pub(crate) r_config: [u32; CONFIG_WORDS],
    pub(crate) i_config: Option<[u32; CONFIG_WORDS]>,
    mem: BTreeMap<u16, [u8; MEM_SLOT_CAPACITY]>,
    pub(crate) active_session: Option<PairingSlot>,
    /// Fail every access; simulates an unreachable chip.
    pub(crate) offline: bool,
    /// Answer endorsement requests with a zeroed signature.
    pub(crate) endorse_garbage: bool,
    pub(crate) pairing_key_writes: usize,
    pub(crate) i_config_writes: usize,
    pub(crate) invalidations: usize,
    pub(crate) l2_transfers: usize,
    pub(crate) l3_transfers: usize,
    pub(crate) last_l2_len: usize,
}

impl SimChip {
    pub(crate) fn new(seed: u64) -> Self {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut exchange_seed = [0u8; KEY_LEN];
        rng.fill_bytes(&mut exchange_seed);
        let mut attestation_seed = [0u8; KEY_LEN];
        rng.fill_bytes(&mut attestation_seed);
        let factory_public = PublicKey::from(&StaticSecret::from(FACTORY_SECRET)).to_bytes();
        Self {
            rng,
            exchange_secret: StaticSecret::from(exchange_seed),
            attestation: SigningKey::from_bytes(&attestation_seed),
            slots: [
                SimSlot::Occupied(factory_public),
                SimSlot::Empty,
                SimSlot::Empty,
                SimSlot::Empty,
            ],
            r_config: [ERASED_WORD; CONFIG_WORDS],
            i_config: None,
            mem: BTreeMap::new(),
            active_session: None,
            offline: false,
            endorse_garbage: false,
            pairing_key_writes: 0,
            i_config_writes: 0,
            invalidations: 0,
            l2_transfers: 0,
            l3_transfers: 0,
            last_l2_len: 0,
        }
    }

    /// Raw slot content as the bus would deliver it, erased bytes included.
    pub(crate) fn mem_read_raw(&self, slot: u16, buf: &mut [u8]) -> usize {
        let n = buf.len().min(MEM_SLOT_CAPACITY);
        buf[..n].fill(ERASED_BYTE);
        if let Some(data) = self.mem.get(&slot) {
            buf[..n].copy_from_slice(&data[..n]);
        }
        n
    }

    fn online(&self) -> Result<(), SeError> {
        if self.offline {
            Err(SeError::Io)
        } else {
            Ok(())
        }
    }

    fn authorize(&self, category: UapCategory) -> Result<(), SeError> {
        let slot = self
            .active_session
            .ok_or(SeError::Status(STATUS_NO_SESSION))?;
        // permissive until the irreversible block is fused
        let Some(i_config) = self.i_config else {
            return Ok(());
        };
        let effective = self.r_config[category.word()] & i_config[category.word()];
        if effective & SlotMask::for_slot(slot).bits() != 0 {
            Ok(())
        } else {
            Err(SeError::Status(STATUS_UNAUTHORIZED))
        }
    }

    fn run_handshake(
        &mut self,
        slot: PairingSlot,
        request: &[u8; HANDSHAKE_REQUEST_LEN],
    ) -> Result<[u8; HANDSHAKE_RESPONSE_LEN], SeError> {
        let host_public = match self.slots[slot as usize] {
            SimSlot::Occupied(key) => key,
            _ => return Err(SeError::Status(STATUS_UNKNOWN_KEY)),
        };
        let (response, _keys) = channel::respond(
            &mut self.rng,
            request,
            &self.exchange_secret.to_bytes(),
            &host_public,
        );
        self.active_session = Some(slot);
        Ok(response)
    }
}

impl Se21x for SimChip {
    fn identity(&mut self) -> Result<ChipIdentity, SeError> {
        self.online()?;
        Ok(ChipIdentity {
            exchange: ByteArray::new(PublicKey::from(&self.exchange_secret).to_bytes()),
            attestation: ByteArray::new(self.attestation.verifying_key().to_bytes()),
        })
    }

    fn endorse(&mut self, challenge: &[u8; CHALLENGE_LEN]) -> Result<[u8; SIGNATURE_LEN], SeError> {
        self.online()?;
        if self.endorse_garbage {
            return Ok([0; SIGNATURE_LEN]);
        }
        Ok(self.attestation.sign(challenge).to_bytes())
    }

    fn handshake(
        &mut self,
        slot: PairingSlot,
        request: &[u8; HANDSHAKE_REQUEST_LEN],
        response: &mut [u8; HANDSHAKE_RESPONSE_LEN],
    ) -> Result<(), SeError> {
        self.online()?;
        *response = self.run_handshake(slot, request)?;
        Ok(())
    }

    fn invalidate_session(&mut self) -> Result<(), SeError> {
        self.online()?;
        self.active_session = None;
        self.invalidations += 1;
        Ok(())
    }

    fn pairing_key_read(&mut self, slot: PairingSlot) -> Result<KeySlotState, SeError> {
        self.online()?;
        self.authorize(UapCategory::PairingKeyRead)?;
        Ok(match self.slots[slot as usize] {
            SimSlot::Empty => KeySlotState::Empty,
            SimSlot::Occupied(key) => KeySlotState::Occupied(key),
            SimSlot::Invalidated => KeySlotState::Invalidated,
        })
    }

    fn pairing_key_write(
        &mut self,
        slot: PairingSlot,
        key: &[u8; KEY_LEN],
    ) -> Result<WriteOutcome, SeError> {
        self.online()?;
        self.authorize(UapCategory::PairingKeyWrite)?;
        self.pairing_key_writes += 1;
        match self.slots[slot as usize] {
            SimSlot::Empty => {
                self.slots[slot as usize] = SimSlot::Occupied(*key);
                Ok(WriteOutcome::Written)
            }
            SimSlot::Occupied(_) => Ok(WriteOutcome::AlreadyWritten),
            SimSlot::Invalidated => Err(SeError::Status(STATUS_UNKNOWN_KEY)),
        }
    }

    fn pairing_key_invalidate(&mut self, slot: PairingSlot) -> Result<(), SeError> {
        self.online()?;
        self.authorize(UapCategory::PairingKeyInvalidate)?;
        self.slots[slot as usize] = SimSlot::Invalidated;
        Ok(())
    }

    fn r_config_erase(&mut self) -> Result<(), SeError> {
        self.online()?;
        self.authorize(UapCategory::RConfigErase)?;
        self.r_config = [ERASED_WORD; CONFIG_WORDS];
        Ok(())
    }

    fn r_config_write(&mut self, words: &[u32; CONFIG_WORDS]) -> Result<(), SeError> {
        self.online()?;
        self.authorize(UapCategory::RConfigWrite)?;
        self.r_config = *words;
        Ok(())
    }

    fn r_config_read(&mut self) -> Result<[u32; CONFIG_WORDS], SeError> {
        self.online()?;
        self.authorize(UapCategory::RConfigRead)?;
        Ok(self.r_config)
    }

    fn i_config_write(&mut self, words: &[u32; CONFIG_WORDS]) -> Result<WriteOutcome, SeError> {
        self.online()?;
        self.authorize(UapCategory::IConfigWrite)?;
        self.i_config_writes += 1;
        if self.i_config.is_some() {
            return Ok(WriteOutcome::AlreadyWritten);
        }
        self.i_config = Some(*words);
        Ok(WriteOutcome::Written)
    }

    fn i_config_read(&mut self) -> Result<[u32; CONFIG_WORDS], SeError> {
        self.online()?;
        self.authorize(UapCategory::IConfigRead)?;
        Ok(self.i_config.unwrap_or([ERASED_WORD; CONFIG_WORDS]))
    }

    fn mem_erase(&mut self, slot: u16) -> Result<(), SeError> {
        self.online()?;
        self.authorize(UapCategory::MemErase)?;
        if slot >= MEM_SLOT_COUNT {
            return Err(SeError::Status(STATUS_BAD_PARAM));
        }
        self.mem.remove(&slot);
        Ok(())
    }

    fn mem_write(&mut self, slot: u16, data: &[u8]) -> Result<(), SeError> {
        self.online()?;
        self.authorize(UapCategory::MemWrite)?;
        if slot >= MEM_SLOT_COUNT || data.len() > MEM_SLOT_CAPACITY {
            return Err(SeError::Status(STATUS_BAD_PARAM));
        }
        let mut stored = [0u8; MEM_SLOT_CAPACITY];
        stored[..data.len()].copy_from_slice(data);
        self.mem.insert(slot, stored);
        Ok(())
    }

    fn mem_read(&mut self, slot: u16, buf: &mut [u8]) -> Result<usize, SeError> {
        self.online()?;
        self.authorize(UapCategory::MemRead)?;
        if slot >= MEM_SLOT_COUNT {
            return Err(SeError::Status(STATUS_BAD_PARAM));
        }
        Ok(self.mem_read_raw(slot, buf))
    }

    fn l2_transfer(&mut self, request: &[u8], response: &mut [u8]) -> Result<usize, SeError> {
        self.online()?;
        self.l2_transfers += 1;
        self.last_l2_len = request.len();
        if request.len() < 2 {
            return Err(SeError::Status(STATUS_BAD_PARAM));
        }
        let payload = &request[2..2 + usize::from(request[1])];

        if request[0] == OP_HANDSHAKE {
            if payload.len() != 1 + HANDSHAKE_REQUEST_LEN {
                return Err(SeError::Status(STATUS_BAD_PARAM));
            }
            let slot = match payload[0] {
                0 => PairingSlot::Factory,
                1 => PairingSlot::Unprivileged,
                2 => PairingSlot::Privileged,
                3 => PairingSlot::Spare,
                _ => return Err(SeError::Status(STATUS_BAD_PARAM)),
            };
            let mut handshake_request = [0u8; HANDSHAKE_REQUEST_LEN];
            handshake_request.copy_from_slice(&payload[1..]);
            let reply = self.run_handshake(slot, &handshake_request)?;
            response[..3].copy_from_slice(&[0x01, request[0], HANDSHAKE_RESPONSE_LEN as u8]);
            response[3..3 + HANDSHAKE_RESPONSE_LEN].copy_from_slice(&reply);
            return Ok(3 + HANDSHAKE_RESPONSE_LEN);
        }

        // any other opcode: acknowledge and echo the payload
        response[..3].copy_from_slice(&[0x01, request[0], payload.len() as u8]);
        response[3..3 + payload.len()].copy_from_slice(payload);
        Ok(3 + payload.len())
    }

    fn l3_transfer(&mut self, frame: &[u8], response: &mut [u8]) -> Result<usize, SeError> {
        self.online()?;
        if self.active_session.is_none() {
            return Err(SeError::Status(STATUS_NO_SESSION));
        }
        self.l3_transfers += 1;
        response[..frame.len()].copy_from_slice(frame);
        Ok(frame.len())
    }
}

/// RAM-backed [`SecretStore`].
pub(crate) struct RamStore {
    files: BTreeMap<String, Vec<u8>>,
}

impl RamStore {
    pub(crate) fn new() -> Self {
        Self {
            files: BTreeMap::new(),
        }
    }

    /// A store holding freshly generated host pairing and extraction keys,
    /// as the personalization step would leave it.
    pub(crate) fn provisioned<R: RngCore>(rng: &mut R) -> Self {
        let mut store = Self::new();
        for path in [UNPRIVILEGED_KEY_PATH, PRIVILEGED_KEY_PATH, EXTRACTION_KEY_PATH] {
            let mut secret = [0u8; KEY_LEN];
            rng.fill_bytes(&mut secret);
            store.insert(path, &secret);
        }
        store
    }

    pub(crate) fn insert(&mut self, path: &Path, data: &[u8]) {
        let name: &str = path.as_ref();
        self.files.insert(name.into(), data.to_vec());
    }
}

impl SecretStore for RamStore {
    fn read(&mut self, path: &Path, buf: &mut [u8]) -> Result<usize, StoreError> {
        let name: &str = path.as_ref();
        let data = self.files.get(name).ok_or(StoreError::NotFound)?;
        if data.len() > buf.len() {
            return Err(StoreError::Io);
        }
        buf[..data.len()].copy_from_slice(data);
        Ok(data.len())
    }

    fn write(&mut self, path: &Path, data: &[u8]) -> Result<(), StoreError> {
        self.insert(path, data);
        Ok(())
    }
}

//! Noise-style secure channel.
//!
//! Two messages establish an authenticated session between an initiator
//! holding a static X25519 key and a responder holding one of a set of
//! candidate static keys. The same construction backs sessions with the
//! chip's pairing-key slots and the extraction channel toward the
//! manufacturing backend, where the responder key rotates and the initiator
//! tries each published candidate in turn.
//!
//! Message 1 is the initiator's ephemeral public key. Message 2 is the
//! responder's ephemeral public key followed by a confirmation tag over the
//! transcript. Three X25519 shared secrets (ephemeral-ephemeral,
//! ephemeral-static and static-ephemeral) feed an HKDF-SHA256 schedule
//! salted with the transcript hash; the schedule yields the confirmation key
//! and the ChaCha20-Poly1305 transport key.

use chacha20poly1305::{AeadInPlace, ChaCha20Poly1305, KeyInit};
use hmac::{Hmac, Mac};
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey, StaticSecret};

use crate::Error;

type HkdfSha256 = hkdf::Hkdf<Sha256>;
type HmacSha256 = Hmac<Sha256>;

/// Raw X25519 key length.
pub const KEY_LEN: usize = 32;
/// Detached AEAD tag and handshake confirmation tag length.
pub const TAG_LEN: usize = 16;
/// First handshake message: the initiator's ephemeral public key.
pub const HANDSHAKE_REQUEST_LEN: usize = KEY_LEN;
/// Second handshake message: responder ephemeral key plus confirmation tag.
pub const HANDSHAKE_RESPONSE_LEN: usize = KEY_LEN + TAG_LEN;

const PROTOCOL_LABEL: &[u8] = b"SE21x-channel-v1";
const NONCE_LEN: usize = 12;

/// Session progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Init,
    Sent,
    Established,
}

/// One secure-channel session, owned by the caller.
///
/// Sessions are independent of each other and of any chip-side state; a
/// caller may hold several at once as long as each one sees its own
/// request/response exchange.
pub struct Session {
    status: Status,
    ephemeral: Option<StaticSecret>,
    ephemeral_public: [u8; KEY_LEN],
    transport_key: Option<[u8; KEY_LEN]>,
    nonce: u64,
}

impl Session {
    pub fn new() -> Self {
        Self {
            status: Status::Init,
            ephemeral: None,
            ephemeral_public: [0; KEY_LEN],
            transport_key: None,
            nonce: 0,
        }
    }

    pub fn status(&self) -> Status {
        self.status
    }

    /// Generate a fresh ephemeral key and produce the first handshake
    /// message. Restarts the session if one was in progress.
    pub fn handshake_1<R: CryptoRng + RngCore>(
        &mut self,
        rng: &mut R,
    ) -> [u8; HANDSHAKE_REQUEST_LEN] {
        let mut seed = [0u8; KEY_LEN];
        rng.fill_bytes(&mut seed);
        let secret = StaticSecret::from(seed);
        self.ephemeral_public = PublicKey::from(&secret).to_bytes();
        self.ephemeral = Some(secret);
        self.transport_key = None;
        self.nonce = 0;
        self.status = Status::Sent;
        self.ephemeral_public
    }

    /// Process the second handshake message, trying each candidate responder
    /// static key in order.
    ///
    /// Returns `Ok(true)` and becomes [`Status::Established`] when a
    /// candidate authenticates the response. Returns `Ok(false)` when none
    /// does; the ephemeral secret is dropped either way, so the only way
    /// forward after a miss is a fresh [`handshake_1`](Self::handshake_1).
    pub fn handshake_2(
        &mut self,
        response: &[u8; HANDSHAKE_RESPONSE_LEN],
        local_static: &[u8; KEY_LEN],
        candidates: &[[u8; KEY_LEN]],
    ) -> Result<bool, Error> {
        if self.status != Status::Sent {
            return Err(Error::ChannelState);
        }
        let ephemeral = self.ephemeral.take().ok_or(Error::ChannelState)?;

        let mut responder_ephemeral = [0u8; KEY_LEN];
        responder_ephemeral.copy_from_slice(&response[..KEY_LEN]);
        let tag = &response[KEY_LEN..];

        let peer = PublicKey::from(responder_ephemeral);
        let local = StaticSecret::from(*local_static);
        let dh_ee = ephemeral.diffie_hellman(&peer);
        let dh_se = local.diffie_hellman(&peer);

        for candidate in candidates {
            let dh_es = ephemeral.diffie_hellman(&PublicKey::from(*candidate));
            let keys = SessionKeys::derive(
                candidate,
                &self.ephemeral_public,
                &responder_ephemeral,
                dh_ee.as_bytes(),
                dh_es.as_bytes(),
                dh_se.as_bytes(),
            );
            if keys.verify_confirmation(&self.ephemeral_public, &responder_ephemeral, tag) {
                self.transport_key = Some(keys.transport);
                self.nonce = 0;
                self.status = Status::Established;
                return Ok(true);
            }
        }
        debug!("no candidate peer key authenticated the handshake response");
        Ok(false)
    }

    /// Seal `plaintext` under the session key, writing `ciphertext || tag`
    /// into `out` and returning the written length.
    ///
    /// The nonce is an internal counter, unique per call for the lifetime of
    /// the session key; the session status does not change.
    pub fn encrypt(
        &mut self,
        plaintext: &[u8],
        associated_data: &[u8],
        out: &mut [u8],
    ) -> Result<usize, Error> {
        if self.status != Status::Established {
            return Err(Error::ChannelState);
        }
        let key = self.transport_key.as_ref().ok_or(Error::ChannelState)?;
        let total = plaintext.len() + TAG_LEN;
        if out.len() < total {
            return Err(Error::Param);
        }

        let mut nonce = [0u8; NONCE_LEN];
        nonce[4..].copy_from_slice(&self.nonce.to_le_bytes());
        out[..plaintext.len()].copy_from_slice(plaintext);

        let aead = ChaCha20Poly1305::new(key.into());
        let tag = aead
            .encrypt_in_place_detached((&nonce).into(), associated_data, &mut out[..plaintext.len()])
            .map_err(|_| Error::Crypto)?;
        out[plaintext.len()..total].copy_from_slice(&tag);
        self.nonce += 1;
        Ok(total)
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Keys derived by the handshake schedule. Both sides of the channel derive
/// the same values from their respective shared-secret computations.
pub(crate) struct SessionKeys {
    confirmation: [u8; KEY_LEN],
    pub(crate) transport: [u8; KEY_LEN],
}

impl SessionKeys {
    pub(crate) fn derive(
        responder_static: &[u8; KEY_LEN],
        initiator_ephemeral: &[u8; KEY_LEN],
        responder_ephemeral: &[u8; KEY_LEN],
        dh_ee: &[u8; KEY_LEN],
        dh_es: &[u8; KEY_LEN],
        dh_se: &[u8; KEY_LEN],
    ) -> Self {
        let mut transcript = Sha256::new();
        transcript.update(PROTOCOL_LABEL);
        transcript.update(responder_static);
        transcript.update(initiator_ephemeral);
        transcript.update(responder_ephemeral);
        let transcript: [u8; 32] = transcript.finalize().into();

        let mut ikm = [0u8; 3 * KEY_LEN];
        ikm[..KEY_LEN].copy_from_slice(dh_ee);
        ikm[KEY_LEN..2 * KEY_LEN].copy_from_slice(dh_es);
        ikm[2 * KEY_LEN..].copy_from_slice(dh_se);

        let kdf = HkdfSha256::new(Some(&transcript), &ikm);
        let mut confirmation = [0u8; KEY_LEN];
        #[allow(clippy::expect_used)]
        kdf.expand(b"confirm", &mut confirmation)
            .expect("Output length is one hash block");
        let mut transport = [0u8; KEY_LEN];
        #[allow(clippy::expect_used)]
        kdf.expand(b"transport", &mut transport)
            .expect("Output length is one hash block");
        Self {
            confirmation,
            transport,
        }
    }

    /// Confirmation tag sent by the responder in message 2.
    pub(crate) fn confirmation_tag(
        &self,
        initiator_ephemeral: &[u8; KEY_LEN],
        responder_ephemeral: &[u8; KEY_LEN],
    ) -> [u8; TAG_LEN] {
        let mac = self.confirmation_mac(initiator_ephemeral, responder_ephemeral);
        let full: [u8; 32] = mac.finalize().into_bytes().into();
        let mut tag = [0u8; TAG_LEN];
        tag.copy_from_slice(&full[..TAG_LEN]);
        tag
    }

    fn verify_confirmation(
        &self,
        initiator_ephemeral: &[u8; KEY_LEN],
        responder_ephemeral: &[u8; KEY_LEN],
        tag: &[u8],
    ) -> bool {
        let mac = self.confirmation_mac(initiator_ephemeral, responder_ephemeral);
        mac.verify_truncated_left(tag).is_ok()
    }

    fn confirmation_mac(
        &self,
        initiator_ephemeral: &[u8; KEY_LEN],
        responder_ephemeral: &[u8; KEY_LEN],
    ) -> HmacSha256 {
        #[allow(clippy::expect_used)]
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.confirmation)
            .expect("Slice will always be of acceptable size");
        mac.update(initiator_ephemeral);
        mac.update(responder_ephemeral);
        mac
    }
}

/// Responder half of the handshake. The chip simulator and the protocol
/// tests derive their keys from the same schedule as [`Session`].
#[cfg(test)]
pub(crate) fn respond<R: CryptoRng + RngCore>(
    rng: &mut R,
    request: &[u8; HANDSHAKE_REQUEST_LEN],
    responder_static: &[u8; KEY_LEN],
    initiator_static_public: &[u8; KEY_LEN],
) -> ([u8; HANDSHAKE_RESPONSE_LEN], SessionKeys) {
    let mut seed = [0u8; KEY_LEN];
    rng.fill_bytes(&mut seed);
    let ephemeral = StaticSecret::from(seed);
    let ephemeral_public = PublicKey::from(&ephemeral).to_bytes();

    let local = StaticSecret::from(*responder_static);
    let initiator_ephemeral = PublicKey::from(*request);
    let dh_ee = ephemeral.diffie_hellman(&initiator_ephemeral);
    let dh_es = local.diffie_hellman(&initiator_ephemeral);
    let dh_se = ephemeral.diffie_hellman(&PublicKey::from(*initiator_static_public));

    let keys = SessionKeys::derive(
        &PublicKey::from(&local).to_bytes(),
        request,
        &ephemeral_public,
        dh_ee.as_bytes(),
        dh_es.as_bytes(),
        dh_se.as_bytes(),
    );
    let mut response = [0u8; HANDSHAKE_RESPONSE_LEN];
    response[..KEY_LEN].copy_from_slice(&ephemeral_public);
    response[KEY_LEN..].copy_from_slice(&keys.confirmation_tag(request, &ephemeral_public));
    (response, keys)
}

//! Opaque relay of operator frames to the chip.
//!
//! During manufacturing test the backend drives the chip directly through
//! this device: it hands over ready-made handshake and command frames, and
//! the device forwards them without interpreting a single payload byte.
//! Only the framing is validated, exhaustively, before anything touches the
//! bus.

use crate::channel::HANDSHAKE_RESPONSE_LEN;
use crate::frame;
use crate::se::Se21x;
use crate::Error;

/// Forwarding state for one operator connection.
///
/// The only state is whether a relayed handshake has completed; commands
/// before that point are refused. The flag is local bookkeeping, the
/// chip-side session itself lives on the chip.
#[derive(Debug, Default)]
pub struct Relay {
    established: bool,
}

impl Relay {
    pub const fn new() -> Self {
        Self { established: false }
    }

    /// Forward a handshake frame, replacing any previously active chip-side
    /// session so the relayed session cannot collide with it.
    pub fn forward_handshake<SE: Se21x>(
        &mut self,
        se: &mut SE,
        frame_bytes: &[u8],
        response: &mut [u8],
    ) -> Result<usize, Error> {
        let len = frame::l2_request_length(frame_bytes)?;
        self.established = false;
        se.invalidate_session()?;
        let received = se.l2_transfer(&frame_bytes[..len], response)?;
        let response_len = frame::l2_response_length(&response[..received])?;
        if response_len != frame::L2_RESPONSE_OVERHEAD + HANDSHAKE_RESPONSE_LEN {
            error!("handshake response has unexpected length {}", response_len);
            return Err(Error::Transport);
        }
        self.established = true;
        debug!("relayed handshake complete");
        Ok(response_len)
    }

    /// Forward an encrypted command frame through the relayed session and
    /// return the chip's response bytes unchanged.
    pub fn forward_command<SE: Se21x>(
        &mut self,
        se: &mut SE,
        frame_bytes: &[u8],
        response: &mut [u8],
    ) -> Result<usize, Error> {
        if !self.established {
            error!("command relayed before a handshake");
            return Err(Error::ChannelState);
        }
        let len = frame::l3_frame_length(frame_bytes)?;
        let received = se.l3_transfer(&frame_bytes[..len], response)?;
        frame::l3_frame_length(&response[..received])
    }
}

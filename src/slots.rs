//! Length-prefixed payloads across user-memory slots.
//!
//! The chip's user memory is an array of fixed-size slots that must be
//! erased before they are rewritten. Payloads larger than one slot span a
//! contiguous range; the first two bytes of the span carry the payload
//! length, big endian, and the remainder of the span is zero padding.
//!
//! `write` erases the whole range before writing, every time. That makes it
//! safe to re-issue after an interruption: a half-written span is undefined
//! until the next full `write`, which starts from erased slots again.

use crate::se::{Se21x, MEM_SLOT_CAPACITY, MEM_SLOT_COUNT};
use crate::Error;

const PREFIX_LEN: usize = 2;

/// A contiguous span of user-memory slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotRange {
    pub first_slot: u16,
    pub slot_count: u16,
    pub slot_capacity: usize,
}

/// Where the device certificate blob lives.
pub const CERTIFICATE_RANGE: SlotRange = SlotRange {
    first_slot: 0,
    slot_count: 8,
    slot_capacity: MEM_SLOT_CAPACITY,
};

impl SlotRange {
    pub const fn capacity(&self) -> usize {
        self.slot_count as usize * self.slot_capacity
    }

    pub const fn payload_capacity(&self) -> usize {
        self.capacity() - PREFIX_LEN
    }

    fn check(&self) {
        assert!(self.slot_capacity >= PREFIX_LEN);
        assert!(self.slot_capacity <= MEM_SLOT_CAPACITY);
        assert!(
            self.first_slot as usize + self.slot_count as usize <= MEM_SLOT_COUNT as usize
        );
    }
}

/// Erase the range and write the length-prefixed, zero-padded payload.
pub fn write<SE: Se21x>(se: &mut SE, range: &SlotRange, data: &[u8]) -> Result<(), Error> {
    range.check();
    if data.len() > range.payload_capacity() {
        return Err(Error::Param);
    }

    for i in 0..range.slot_count {
        se.mem_erase(range.first_slot + i)?;
    }

    let prefix = (data.len() as u16).to_be_bytes();
    let mut chunk_buf = [0u8; MEM_SLOT_CAPACITY];
    for i in 0..range.slot_count {
        let base = i as usize * range.slot_capacity;
        let chunk = &mut chunk_buf[..range.slot_capacity];
        for (k, byte) in chunk.iter_mut().enumerate() {
            let pos = base + k;
            *byte = if pos < PREFIX_LEN {
                prefix[pos]
            } else if pos - PREFIX_LEN < data.len() {
                data[pos - PREFIX_LEN]
            } else {
                0
            };
        }
        se.mem_write(range.first_slot + i, chunk)?;
    }
    debug!(
        "wrote {} bytes across slots {}..{}",
        data.len(),
        range.first_slot,
        range.first_slot + range.slot_count
    );
    Ok(())
}

/// Read the full span and return the payload length.
pub fn read<SE: Se21x>(se: &mut SE, range: &SlotRange, out: &mut [u8]) -> Result<usize, Error> {
    range.check();

    let mut chunk_buf = [0u8; MEM_SLOT_CAPACITY];
    let mut prefix = [0u8; PREFIX_LEN];
    let mut declared = 0usize;
    for i in 0..range.slot_count {
        let chunk = &mut chunk_buf[..range.slot_capacity];
        let got = se.mem_read(range.first_slot + i, chunk)?;
        if got != range.slot_capacity {
            error!("slot {} returned {} of {} bytes", range.first_slot + i, got, range.slot_capacity);
            return Err(Error::Transport);
        }
        for (k, &byte) in chunk.iter().enumerate() {
            let pos = i as usize * range.slot_capacity + k;
            if pos < PREFIX_LEN {
                prefix[pos] = byte;
                if pos == PREFIX_LEN - 1 {
                    declared = usize::from(u16::from_be_bytes(prefix));
                    if declared > range.payload_capacity() {
                        error!(
                            "span declares {} bytes, capacity is {}",
                            declared,
                            range.payload_capacity()
                        );
                        return Err(Error::VerificationMismatch);
                    }
                    if declared > out.len() {
                        return Err(Error::Param);
                    }
                }
            } else if pos - PREFIX_LEN < declared {
                out[pos - PREFIX_LEN] = byte;
            }
        }
    }
    Ok(declared)
}

pub fn write_certificate<SE: Se21x>(se: &mut SE, certificate: &[u8]) -> Result<(), Error> {
    write(se, &CERTIFICATE_RANGE, certificate)
}

pub fn read_certificate<SE: Se21x>(se: &mut SE, out: &mut [u8]) -> Result<usize, Error> {
    read(se, &CERTIFICATE_RANGE, out)
}

#![cfg_attr(not(test), no_std)]

//! Factory provisioning support for the SE21x secure element.
//!
//! The SE21x ships with a well-known factory pairing key. During
//! manufacturing test this crate replaces it with device-specific keys
//! ([`pairing`]), irreversibly commits the access-permission configuration
//! ([`config`]), relays operator frames to the chip ([`relay`]) and seals
//! extracted secrets toward the manufacturing backend ([`extract`]).
//!
//! All mutating operations are safe to re-run from scratch after an
//! interruption: each write is followed by a verifying read, and the chip's
//! persisted state is the only source of truth. Callers are expected to be a
//! single synchronous task; nothing here locks or retries on its own.
//!
//! The SE21x bus driver, the durable key storage and the operator CLI are
//! external collaborators, reached through the [`se::Se21x`] and
//! [`store::SecretStore`] traits.

#[macro_use]
extern crate delog;
generate_macros!();

pub mod channel;
pub mod config;
pub mod error;
pub mod extract;
pub mod frame;
pub mod pairing;
pub mod relay;
pub mod se;
pub mod slots;
pub mod store;

#[cfg(test)]
pub(crate) mod mock;

pub use error::Error;

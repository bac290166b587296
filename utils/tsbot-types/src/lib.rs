//! `tsbot-types` contains the cryptographic building blocks of the TeamSpeak
//! protocol.
//!
//! - [`cmac`]: OMAC1 over AES-128
//! - [`eax`]: the authenticated encryption that protects every packet
//! - [`crypto`]: P-256 identities, Ed25519 points and hash helpers

pub mod cmac;
pub mod crypto;
pub mod eax;

pub use crate::crypto::{sha1, sha256, sha512};

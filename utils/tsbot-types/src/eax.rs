//! EAX authenticated encryption over AES-128.
//!
//! TeamSpeak truncates the tag to [`TAG_LEN`] bytes and sends it as the packet
//! mac, the packet header is the associated data.
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Block};
use subtle::ConstantTimeEq;
use thiserror::Error;

use crate::cmac::{Cmac, BLOCK_SIZE};

/// The tag length used by the TeamSpeak protocol.
pub const TAG_LEN: usize = 8;

#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[non_exhaustive]
pub enum Error {
	#[error("Wrong mac")]
	WrongMac,
	#[error("Invalid tag length {0}")]
	InvalidTagLength(usize),
}

#[derive(Clone)]
pub struct Eax {
	cipher: Aes128,
	mac: Cmac,
}

impl Eax {
	pub fn new(key: &[u8; 16]) -> Self {
		Self { cipher: Aes128::new(key.into()), mac: Cmac::new(key) }
	}

	/// `OMAC(t || data)` where `t` is prepended as a full block.
	fn omac_t(&self, t: u8, data: &[u8]) -> [u8; BLOCK_SIZE] {
		let mut mac = self.mac.reset();
		let mut prefix = [0; BLOCK_SIZE];
		prefix[BLOCK_SIZE - 1] = t;
		mac.update(&prefix);
		mac.update(data);
		mac.finalize()
	}

	/// XOR the AES-CTR key stream starting at `counter` onto `data`.
	fn ctr(&self, counter: &[u8; BLOCK_SIZE], data: &mut [u8]) {
		let mut counter = u128::from_be_bytes(*counter);
		for chunk in data.chunks_mut(BLOCK_SIZE) {
			let mut block = Block::from(counter.to_be_bytes());
			self.cipher.encrypt_block(&mut block);
			for (d, k) in chunk.iter_mut().zip(block.iter()) {
				*d ^= k;
			}
			counter = counter.wrapping_add(1);
		}
	}

	fn tag(&self, n: &[u8; BLOCK_SIZE], header: &[u8], ciphertext: &[u8]) -> [u8; BLOCK_SIZE] {
		let h = self.omac_t(1, header);
		let c = self.omac_t(2, ciphertext);
		let mut tag = [0; BLOCK_SIZE];
		for i in 0..BLOCK_SIZE {
			tag[i] = n[i] ^ h[i] ^ c[i];
		}
		tag
	}

	/// Encrypt `data` in-place and return the full tag.
	///
	/// Take the first [`TAG_LEN`] bytes for a packet mac.
	pub fn encrypt(&self, nonce: &[u8], header: &[u8], data: &mut [u8]) -> [u8; BLOCK_SIZE] {
		let n = self.omac_t(0, nonce);
		self.ctr(&n, data);
		self.tag(&n, header, data)
	}

	/// Check the (possibly truncated) tag and decrypt `data` in-place.
	///
	/// `data` is left untouched if the tag does not match.
	pub fn decrypt(
		&self, nonce: &[u8], header: &[u8], data: &mut [u8], tag: &[u8],
	) -> Result<(), Error> {
		if tag.is_empty() || tag.len() > BLOCK_SIZE {
			return Err(Error::InvalidTagLength(tag.len()));
		}
		let n = self.omac_t(0, nonce);
		let expected = self.tag(&n, header, data);
		if !bool::from(expected[..tag.len()].ct_eq(tag)) {
			return Err(Error::WrongMac);
		}
		self.ctr(&n, data);
		Ok(())
	}
}

/// Encrypt with a one-off key, returns the mac truncated to [`TAG_LEN`].
pub fn encrypt(
	key: &[u8; 16], nonce: &[u8; 16], header: &[u8], data: &mut [u8],
) -> [u8; TAG_LEN] {
	let tag = Eax::new(key).encrypt(nonce, header, data);
	let mut mac = [0; TAG_LEN];
	mac.copy_from_slice(&tag[..TAG_LEN]);
	mac
}

/// Decrypt with a one-off key and a [`TAG_LEN`] byte mac.
pub fn decrypt(
	key: &[u8; 16], nonce: &[u8; 16], header: &[u8], data: &mut [u8], mac: &[u8; TAG_LEN],
) -> Result<(), Error> {
	Eax::new(key).decrypt(nonce, header, data, mac)
}

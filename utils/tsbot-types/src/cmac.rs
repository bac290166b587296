//! CMAC (OMAC1) with AES-128 as block cipher, as described in RFC 4493.
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Block};

pub const BLOCK_SIZE: usize = 16;

/// Incremental CMAC state.
///
/// The last block is kept back until [`Cmac::finalize`] because its
/// treatment depends on whether it is complete.
#[derive(Clone)]
pub struct Cmac {
	cipher: Aes128,
	k1: [u8; BLOCK_SIZE],
	k2: [u8; BLOCK_SIZE],
	state: [u8; BLOCK_SIZE],
	buffer: [u8; BLOCK_SIZE],
	buffer_len: usize,
}

/// Multiply by `x` in GF(2^128).
fn dbl(block: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
	let mut res = [0; BLOCK_SIZE];
	let mut carry = 0;
	for i in (0..BLOCK_SIZE).rev() {
		res[i] = (block[i] << 1) | carry;
		carry = block[i] >> 7;
	}
	if block[0] & 0x80 != 0 {
		res[BLOCK_SIZE - 1] ^= 0x87;
	}
	res
}

impl Cmac {
	pub fn new(key: &[u8; 16]) -> Self {
		let cipher = Aes128::new(key.into());
		let mut l = Block::default();
		cipher.encrypt_block(&mut l);
		let mut l_arr = [0; BLOCK_SIZE];
		l_arr.copy_from_slice(&l);
		let k1 = dbl(&l_arr);
		let k2 = dbl(&k1);
		Self::with_subkeys(cipher, k1, k2)
	}

	fn with_subkeys(cipher: Aes128, k1: [u8; BLOCK_SIZE], k2: [u8; BLOCK_SIZE]) -> Self {
		Self { cipher, k1, k2, state: [0; BLOCK_SIZE], buffer: [0; BLOCK_SIZE], buffer_len: 0 }
	}

	/// A fresh state with the same key, without recomputing the subkeys.
	pub fn reset(&self) -> Self { Self::with_subkeys(self.cipher.clone(), self.k1, self.k2) }

	fn process_buffer(&mut self) {
		let mut block = Block::default();
		for i in 0..BLOCK_SIZE {
			block[i] = self.state[i] ^ self.buffer[i];
		}
		self.cipher.encrypt_block(&mut block);
		self.state.copy_from_slice(&block);
		self.buffer_len = 0;
	}

	pub fn update(&mut self, mut data: &[u8]) {
		while !data.is_empty() {
			// Only chain a full buffer when more data follows
			if self.buffer_len == BLOCK_SIZE {
				self.process_buffer();
			}
			let n = std::cmp::min(BLOCK_SIZE - self.buffer_len, data.len());
			self.buffer[self.buffer_len..self.buffer_len + n].copy_from_slice(&data[..n]);
			self.buffer_len += n;
			data = &data[n..];
		}
	}

	pub fn finalize(mut self) -> [u8; BLOCK_SIZE] {
		let mut last = [0; BLOCK_SIZE];
		if self.buffer_len == BLOCK_SIZE {
			for i in 0..BLOCK_SIZE {
				last[i] = self.buffer[i] ^ self.k1[i];
			}
		} else {
			last[..self.buffer_len].copy_from_slice(&self.buffer[..self.buffer_len]);
			last[self.buffer_len] = 0x80;
			for i in 0..BLOCK_SIZE {
				last[i] ^= self.k2[i];
			}
		}
		self.buffer = last;
		self.process_buffer();
		self.state
	}
}

/// Compute the CMAC of `data` in one go.
pub fn cmac(key: &[u8; 16], data: &[u8]) -> [u8; BLOCK_SIZE] {
	let mut mac = Cmac::new(key);
	mac.update(data);
	mac.finalize()
}

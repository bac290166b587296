//! Parameters that are shared by all connections.
//!
//! The license root and the size limits are not global state, so tests can
//! issue their own license chains and lower the limits.
use std::sync::Arc;

use curve25519_dalek_ng::edwards::{CompressedEdwardsY, EdwardsPoint};

use crate::{Error, Result, MAX_DECOMPRESSED_SIZE, MAX_FRAGMENTS_LENGTH, ROOT_KEY};

#[derive(Clone, Debug)]
pub struct CryptoContext(Arc<Inner>);

#[derive(Debug)]
struct Inner {
	root: EdwardsPoint,
	max_decompressed_size: u32,
	max_fragments_length: usize,
}

impl CryptoContext {
	/// Use another root for the license chain.
	pub fn with_root(root: EdwardsPoint) -> Self {
		Self(Arc::new(Inner {
			root,
			max_decompressed_size: MAX_DECOMPRESSED_SIZE,
			max_fragments_length: MAX_FRAGMENTS_LENGTH,
		}))
	}

	pub fn with_root_bytes(root: [u8; 32]) -> Result<Self> {
		let root = CompressedEdwardsY(root).decompress().ok_or(Error::LicenseKey)?;
		Ok(Self::with_root(root))
	}

	pub fn with_limits(&self, max_decompressed_size: u32, max_fragments_length: usize) -> Self {
		Self(Arc::new(Inner { root: self.0.root, max_decompressed_size, max_fragments_length }))
	}

	#[inline]
	pub fn root(&self) -> &EdwardsPoint { &self.0.root }
	#[inline]
	pub fn max_decompressed_size(&self) -> u32 { self.0.max_decompressed_size }
	#[inline]
	pub fn max_fragments_length(&self) -> usize { self.0.max_fragments_length }
}

impl Default for CryptoContext {
	/// The context for TeamSpeak servers.
	fn default() -> Self {
		// The root key is a constant valid point
		match CompressedEdwardsY(ROOT_KEY).decompress() {
			Some(root) => Self::with_root(root),
			None => unreachable!("The TeamSpeak root key is a valid point"),
		}
	}
}

//! Client identities and the hash cash that raises their security level.
//!
//! The level of an identity is the number of leading zero bits of
//! `SHA1(omega || key_offset)`, where omega is the public key. Servers require
//! a minimum level, so raising it is a brute-force search over the offset.
use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tsbot_types::crypto::{sha1, EccKeyPrivP256};

use crate::{Error, Result};

/// How many offsets are tried between two checks of the cancellation token.
const CANCEL_CHECK_INTERVAL: u64 = 4096;

#[derive(Clone, Deserialize, Serialize)]
pub struct Identity {
	#[serde(serialize_with = "serialize_key", deserialize_with = "deserialize_key")]
	key: EccKeyPrivP256,
	key_offset: u64,
}

fn serialize_key<S: Serializer>(key: &EccKeyPrivP256, ser: S) -> Result<S::Ok, S::Error> {
	key.to_ts().map_err(serde::ser::Error::custom)?.serialize(ser)
}

fn deserialize_key<'de, D: Deserializer<'de>>(de: D) -> Result<EccKeyPrivP256, D::Error> {
	let s = String::deserialize(de)?;
	EccKeyPrivP256::import_str(&s).map_err(serde::de::Error::custom)
}

impl fmt::Debug for Identity {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		let uid = self.uid().unwrap_or_default();
		write!(f, "Identity({}, offset {})", uid, self.key_offset)
	}
}

impl Identity {
	/// A new identity with level 0 that is usable on servers without a
	/// security level.
	pub fn create() -> Self { Self::new(EccKeyPrivP256::create(), 0) }

	pub fn new(key: EccKeyPrivP256, key_offset: u64) -> Self { Self { key, key_offset } }

	/// Import the private key from any known format, the tomcrypt format or the
	/// obfuscated format.
	pub fn new_from_str(key: &str, key_offset: u64) -> Result<Self> {
		Ok(Self::new(EccKeyPrivP256::import_str(key)?, key_offset))
	}

	/// From the raw 32 byte private key.
	pub fn new_from_short(key: &[u8], key_offset: u64) -> Result<Self> {
		Ok(Self::new(EccKeyPrivP256::from_short(key)?, key_offset))
	}

	/// Import an identity from the TeamSpeak settings file.
	///
	/// The format is `<key_offset>V<obfuscated key>`.
	pub fn new_from_ts_identity(s: &str) -> Result<Self> {
		let (offset, key) = s
			.split_once('V')
			.ok_or(tsbot_types::crypto::Error::NoCounterBlock)?;
		let key_offset = offset.parse()?;
		Ok(Self::new(EccKeyPrivP256::from_ts_obfuscated(key)?, key_offset))
	}

	pub fn to_ts_identity(&self) -> Result<String> {
		Ok(format!("{}V{}", self.key_offset, self.key.to_ts_obfuscated()?))
	}

	#[inline]
	pub fn key(&self) -> &EccKeyPrivP256 { &self.key }
	#[inline]
	pub fn key_offset(&self) -> u64 { self.key_offset }

	/// The base64 encoded public key.
	pub fn omega(&self) -> Result<String> { Ok(self.key.to_pub().to_ts()?) }

	pub fn uid(&self) -> Result<String> { Ok(self.key.to_pub().get_uid()?) }

	pub fn level(&self) -> Result<u8> {
		Ok(get_hash_cash_level(&self.omega()?, self.key_offset))
	}

	/// Search an offset with at least the given level, starting at the
	/// current offset.
	///
	/// The search runs on a blocking thread. Dropping the future or cancelling
	/// the token stops it. The identity is only changed if the search finished.
	pub async fn upgrade_level(&mut self, level: u8, cancel: CancellationToken) -> Result<u64> {
		let omega = self.omega()?;
		if get_hash_cash_level(&omega, self.key_offset) >= level {
			return Ok(self.key_offset);
		}
		info!(level, "Upgrading identity level");
		let offset = spawn_hash_cash(omega, self.key_offset, level, cancel).await?;
		debug!(offset, "Found identity offset");
		self.key_offset = offset;
		Ok(offset)
	}
}

/// Create a new identity with at least the given level.
pub async fn generate_identity(level: u8, cancel: CancellationToken) -> Result<Identity> {
	let mut identity = Identity::create();
	identity.upgrade_level(level, cancel).await?;
	Ok(identity)
}

async fn spawn_hash_cash(
	omega: String, start: u64, level: u8, cancel: CancellationToken,
) -> Result<u64> {
	let token = cancel.child_token();
	// Cancels the worker if this future is dropped
	let guard = token.clone().drop_guard();
	let res = tokio::task::spawn_blocking(move || hash_cash(&omega, start, level, &token)).await;
	guard.disarm();
	res?
}

/// Increase the offset until the level is reached.
pub fn hash_cash(omega: &str, start: u64, level: u8, cancel: &CancellationToken) -> Result<u64> {
	let mut offset = start;
	let mut i = 0u64;
	while get_hash_cash_level(omega, offset) < level {
		if i % CANCEL_CHECK_INTERVAL == 0 && cancel.is_cancelled() {
			return Err(Error::Cancelled);
		}
		offset = offset.checked_add(1).ok_or(Error::MaxLengthExceeded("key offset".into()))?;
		i += 1;
	}
	Ok(offset)
}

/// Count the leading zero bits of `SHA1(omega || offset)`.
#[inline]
pub fn get_hash_cash_level(omega: &str, offset: u64) -> u8 {
	let data = sha1(format!("{}{}", omega, offset).as_bytes());
	let mut res = 0;
	for &d in &data {
		if d == 0 {
			res += 8;
		} else {
			res += d.leading_zeros() as u8;
			break;
		}
	}
	res
}

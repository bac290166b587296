//! The license chain that a server sends in `initivexpand2`.
//!
//! Every block carries an Ed25519 point. Multiplied with the hash of the
//! block and added to the result of the previous block, starting at the
//! root, the chain derives the public key of the server.
use std::str;

use curve25519_dalek_ng::edwards::EdwardsPoint;
use curve25519_dalek_ng::scalar::Scalar;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tsbot_types::crypto::{sha512, EccKeyPrivEd25519, EccKeyPubEd25519};

use crate::context::CryptoContext;
use crate::{Error, Result, TIMESTAMP_OFFSET};

/// Length of a block without the type specific part.
const MIN_BLOCK_LEN: usize = 42;
const LICENSE_VERSION: u8 = 1;

#[derive(Clone, Debug)]
pub struct License {
	pub key: EccKeyPubEd25519,
	pub not_valid_before: OffsetDateTime,
	pub not_valid_after: OffsetDateTime,
	/// First 32 bytes of `SHA512(block without the key kind)`.
	pub hash: [u8; 32],
	pub inner: InnerLicense,
}

#[derive(Clone, Copy, Debug, Deserialize, Eq, FromPrimitive, PartialEq, Serialize, ToPrimitive)]
pub enum LicenseType {
	None,
	Offline,
	Sdk,
	SdkOffline,
	/// Non-profit license
	Npl,
	/// Authorized Teamspeak hosting provider
	Athp,
	/// Annual activation license
	Aal,
	/// 32 slots default license
	Default,
	Gamer,
	Sponsorship,
	Commercial,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum InnerLicense {
	/// Type 0
	Intermediate { issuer: String, unknown: [u8; 4] },
	/// Type 2
	Server { license_type: LicenseType, issuer: String, unknown: [u8; 4] },
	/// Type 8, used by newer servers.
	///
	/// The license type is kept as the raw byte, its values are not known.
	Ts5Server { license_type: u8, properties: Vec<Vec<u8>> },
	/// Type 32
	Ephemeral,
}

#[derive(Clone, Debug, Default)]
pub struct Licenses {
	pub blocks: Vec<License>,
}

/// Decodes the type specific part of a block.
///
/// Returns the license and the length of the part after the common header.
type BlockDecoder = fn(&[u8]) -> Result<(InnerLicense, usize)>;

const DECODERS: &[(u8, BlockDecoder)] =
	&[(0, decode_intermediate), (2, decode_server), (8, decode_ts5_server), (32, decode_ephemeral)];

/// Read a null-terminated string starting at `start`.
fn read_string(data: &[u8], start: usize) -> Result<&str> {
	let rest = data.get(start..).ok_or(Error::LicenseTooShort(data.len()))?;
	let len = rest.iter().position(|&b| b == 0).ok_or(Error::LicenseString)?;
	Ok(str::from_utf8(&rest[..len])?)
}

fn read_unknown(data: &[u8], start: usize) -> Result<[u8; 4]> {
	let mut res = [0; 4];
	res.copy_from_slice(data.get(start..start + 4).ok_or(Error::LicenseTooShort(data.len()))?);
	Ok(res)
}

fn decode_intermediate(data: &[u8]) -> Result<(InnerLicense, usize)> {
	let unknown = read_unknown(data, 42)?;
	let issuer = read_string(data, 46)?;
	let len = issuer.len();
	Ok((InnerLicense::Intermediate { issuer: issuer.to_string(), unknown }, 5 + len))
}

fn decode_server(data: &[u8]) -> Result<(InnerLicense, usize)> {
	let t = *data.get(42).ok_or(Error::LicenseTooShort(data.len()))?;
	let license_type = LicenseType::from_u8(t).ok_or(Error::LicenseType(t))?;
	let unknown = read_unknown(data, 43)?;
	let issuer = read_string(data, 47)?;
	let len = issuer.len();
	Ok((InnerLicense::Server { license_type, issuer: issuer.to_string(), unknown }, 6 + len))
}

fn decode_ts5_server(data: &[u8]) -> Result<(InnerLicense, usize)> {
	if data.len() < 44 {
		return Err(Error::LicenseTooShort(data.len()));
	}
	let license_type = data[42];
	let count = data[43];
	let mut off = 44;
	let mut properties = Vec::with_capacity(count.into());
	for _ in 0..count {
		let len = usize::from(*data.get(off).ok_or(Error::LicenseTooShort(data.len()))?);
		let prop = data.get(off + 1..off + 1 + len).ok_or(Error::LicenseTooShort(data.len()))?;
		properties.push(prop.to_vec());
		off += 1 + len;
	}
	Ok((InnerLicense::Ts5Server { license_type, properties }, off - MIN_BLOCK_LEN))
}

fn decode_ephemeral(_: &[u8]) -> Result<(InnerLicense, usize)> { Ok((InnerLicense::Ephemeral, 0)) }

fn read_time(data: &[u8], off: usize) -> Result<OffsetDateTime> {
	let mut buf = [0; 4];
	buf.copy_from_slice(&data[off..off + 4]);
	Ok(OffsetDateTime::from_unix_timestamp(i64::from(u32::from_be_bytes(buf)) + TIMESTAMP_OFFSET)?)
}

fn write_time(data: &mut Vec<u8>, time: OffsetDateTime) -> Result<()> {
	let ts = u32::try_from(time.unix_timestamp() - TIMESTAMP_OFFSET)
		.map_err(|_| Error::InvalidLicenseTime(time))?;
	data.extend_from_slice(&ts.to_be_bytes());
	Ok(())
}

/// Clear bit 255 of our key and compute `SHA512(public_key * private_key)`.
pub fn get_shared_secret2(public_key: &EdwardsPoint, private_key: &EccKeyPrivEd25519) -> [u8; 64] {
	let mut priv_key = private_key.to_bytes();
	priv_key[31] &= 0x7f;
	let res = public_key * Scalar::from_bits(priv_key);
	sha512(&res.compress().0)
}

impl Licenses {
	/// Parse a license chain and check that all blocks are valid now.
	pub fn parse(data: &[u8]) -> Result<Self> {
		let res = Self::parse_ignore_expired(data)?;
		let now = OffsetDateTime::now_utc();
		if res.blocks.iter().any(|l| l.not_valid_before > now || l.not_valid_after < now) {
			return Err(Error::LicenseExpired);
		}
		Ok(res)
	}

	pub fn parse_ignore_expired(data: &[u8]) -> Result<Self> {
		let version = *data.first().ok_or(Error::LicenseTooShort(0))?;
		if version != LICENSE_VERSION {
			return Err(Error::LicenseVersion(version));
		}
		let mut data = &data[1..];
		let mut res = Licenses { blocks: Vec::new() };
		while !data.is_empty() {
			let (license, len) = License::parse(data)?;
			res.blocks.push(license);
			data = &data[len..];
		}
		Ok(res)
	}

	pub fn derive_public_key(&self, ctx: &CryptoContext) -> Result<EdwardsPoint> {
		let mut last_round = *ctx.root();
		for l in &self.blocks {
			last_round = l.derive_public_key(&last_round)?;
		}
		Ok(last_round)
	}

	pub fn to_bytes(&self) -> Result<Vec<u8>> {
		let mut res = vec![LICENSE_VERSION];
		for l in &self.blocks {
			res.extend_from_slice(&l.to_bytes()?);
		}
		Ok(res)
	}
}

impl License {
	/// Parse a license block and return the read length.
	pub fn parse(data: &[u8]) -> Result<(Self, usize)> {
		if data.len() < MIN_BLOCK_LEN {
			return Err(Error::LicenseTooShort(data.len()));
		}
		if data[0] != 0 {
			return Err(Error::LicenseKeyKind(data[0]));
		}

		let mut key_data = [0; 32];
		key_data.copy_from_slice(&data[1..33]);

		let decoder = DECODERS
			.iter()
			.find(|(t, _)| *t == data[33])
			.map(|(_, d)| d)
			.ok_or(Error::LicenseBlockType(data[33]))?;
		let (inner, extra_len) = decoder(data)?;

		let all_len = MIN_BLOCK_LEN + extra_len;
		if data.len() < all_len {
			return Err(Error::LicenseTooShort(data.len()));
		}
		let mut hash = [0; 32];
		hash.copy_from_slice(&sha512(&data[1..all_len])[..32]);

		Ok((
			License {
				key: EccKeyPubEd25519::from_bytes(key_data),
				not_valid_before: read_time(data, 34)?,
				not_valid_after: read_time(data, 38)?,
				hash,
				inner,
			},
			all_len,
		))
	}

	/// Create a block and compute its hash.
	pub fn new(
		key: EccKeyPubEd25519, not_valid_before: OffsetDateTime, not_valid_after: OffsetDateTime,
		inner: InnerLicense,
	) -> Result<Self> {
		let mut res = Self { key, not_valid_before, not_valid_after, hash: [0; 32], inner };
		let data = res.to_bytes()?;
		res.hash.copy_from_slice(&sha512(&data[1..])[..32]);
		Ok(res)
	}

	pub fn new_ephemeral(
		key: EccKeyPubEd25519, not_valid_before: OffsetDateTime, not_valid_after: OffsetDateTime,
	) -> Result<Self> {
		Self::new(key, not_valid_before, not_valid_after, InnerLicense::Ephemeral)
	}

	pub fn block_type(&self) -> u8 {
		match self.inner {
			InnerLicense::Intermediate { .. } => 0,
			InnerLicense::Server { .. } => 2,
			InnerLicense::Ts5Server { .. } => 8,
			InnerLicense::Ephemeral => 32,
		}
	}

	pub fn to_bytes(&self) -> Result<Vec<u8>> {
		let mut res = Vec::with_capacity(MIN_BLOCK_LEN);
		// Key kind
		res.push(0);
		res.extend_from_slice(&self.key.to_bytes());
		res.push(self.block_type());
		write_time(&mut res, self.not_valid_before)?;
		write_time(&mut res, self.not_valid_after)?;
		match &self.inner {
			InnerLicense::Intermediate { issuer, unknown } => {
				res.extend_from_slice(unknown);
				res.extend_from_slice(issuer.as_bytes());
				res.push(0);
			}
			InnerLicense::Server { license_type, issuer, unknown } => {
				res.push(*license_type as u8);
				res.extend_from_slice(unknown);
				res.extend_from_slice(issuer.as_bytes());
				res.push(0);
			}
			InnerLicense::Ts5Server { license_type, properties } => {
				let count = u8::try_from(properties.len())
					.map_err(|_| Error::MaxLengthExceeded("license properties".into()))?;
				res.push(*license_type);
				res.push(count);
				for p in properties {
					let len = u8::try_from(p.len())
						.map_err(|_| Error::MaxLengthExceeded("license property".into()))?;
					res.push(len);
					res.extend_from_slice(p);
				}
			}
			InnerLicense::Ephemeral => {}
		}
		Ok(res)
	}

	/// Add this block to the key of the previous block.
	pub fn derive_public_key(&self, parent_key: &EdwardsPoint) -> Result<EdwardsPoint> {
		let pub_key = self.key.decompress().ok_or(Error::LicenseKey)?;
		Ok(pub_key * self.private_scalar() + parent_key)
	}

	/// The clamped hash, which is used as a private key.
	///
	/// The scalar is not reduced, so multiplying clears the cofactor.
	pub fn private_scalar(&self) -> Scalar {
		let mut priv_key = self.hash;
		priv_key[0] &= 248;
		priv_key[31] &= 63;
		priv_key[31] |= 64;
		Scalar::from_bits(priv_key)
	}
}

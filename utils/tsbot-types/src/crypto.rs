//! Identities, the ephemeral Ed25519 keys of the handshake and hash helpers.
use std::{fmt, str};

use base64::prelude::*;
use curve25519_dalek_ng::constants;
use curve25519_dalek_ng::edwards::{CompressedEdwardsY, EdwardsPoint};
use curve25519_dalek_ng::scalar::Scalar;
use elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use generic_array::typenum::Unsigned;
use generic_array::GenericArray;
use num_bigint::{BigInt, Sign};
use p256::ecdsa::signature::{Signer, Verifier};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha1::{Digest, Sha1};
use sha2::{Sha256, Sha512};
use simple_asn1::ASN1Block;
use thiserror::Error;

type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum Error {
	#[error("More than one ASN.1 block")]
	TooManyAsn1Blocks,
	#[error("Invalid ASN.1: Expected a public key, not a private key")]
	UnexpectedPrivateKey,
	#[error("Invalid ASN.1: Does not contain a private key")]
	NoPrivateKey,
	#[error("Invalid ASN.1: Public key not found")]
	PublicKeyNotFound,
	#[error("Invalid ASN.1: Expected a bitstring")]
	ExpectedBitString,
	#[error("Invalid ASN.1: Expected a sequence")]
	ExpectedSequence,
	#[error("Key data is empty")]
	EmptyKeyData,
	#[error("Any known methods to decode the key failed")]
	KeyDecodeError,
	#[error("Failed to parse short private key")]
	NoShortKey,
	#[error("Not a obfuscated TeamSpeak key")]
	NoObfuscatedKey,
	#[error("Found no initial 'V' with a valid number before")]
	NoCounterBlock,
	#[error("Failed to parse public key")]
	ParsePublicKeyFailed,
	#[error("Wrong key length")]
	WrongKeyLength,
	#[error("Failed to parse public key, expected length {expected} but got {got}")]
	WrongPublicKeyLength { expected: usize, got: usize },
	#[error("Wrong signature")]
	WrongSignature { key: EccKeyPubP256, data: Vec<u8>, signature: Vec<u8> },

	#[error(transparent)]
	Asn1Decode(#[from] simple_asn1::ASN1DecodeErr),
	#[error(transparent)]
	Asn1Encode(#[from] simple_asn1::ASN1EncodeErr),
	#[error(transparent)]
	Base64(#[from] base64::DecodeError),
	#[error(transparent)]
	Utf8(#[from] std::str::Utf8Error),
}

/// Xored onto saved identities in the TeamSpeak client settings file.
const IDENTITY_OBFUSCATION: [u8; 128] = *b"b9dfaa7bee6ac57ac7b65f1094a1c155\
	e747327bc2fe5d51c512023fe54a280201004e90ad1daaae1075d53b7d571c30e063b5a\
	62a4a017bb394833aa0983e6e";

/// A public ecc key.
///
/// The curve of this key is P-256, or PRIME256v1 as it is called by openssl.
#[derive(Clone, Deserialize, Eq, PartialEq, Serialize)]
pub struct EccKeyPubP256(
	#[serde(
		deserialize_with = "deserialize_ecc_key_pub_p256",
		serialize_with = "serialize_ecc_key_pub_p256"
	)]
	p256::PublicKey,
);
/// A private ecc key.
///
/// The curve of this key is P-256, or PRIME256v1 as it is called by openssl.
#[derive(Clone)]
pub struct EccKeyPrivP256(p256::SecretKey);

/// A public ecc key.
///
/// The curve of this key is Ed25519.
#[derive(Clone)]
pub struct EccKeyPubEd25519(pub CompressedEdwardsY);
/// A private ecc key.
///
/// The curve of this key is Ed25519.
#[derive(Clone)]
pub struct EccKeyPrivEd25519(pub Scalar);

/// Passwords are encoded as base64(sha1(password)).
pub fn encode_password(password: &[u8]) -> String {
	BASE64_STANDARD.encode(sha1(password))
}

pub fn sha1(data: &[u8]) -> [u8; 20] { Sha1::digest(data).into() }

pub fn sha256(data: &[u8]) -> [u8; 32] { Sha256::digest(data).into() }

pub fn sha512(data: &[u8]) -> [u8; 64] { Sha512::digest(data).into() }

/// Big-endian bytes of an ASN.1 integer, left-padded to the field size.
fn field_bytes(i: &BigInt) -> Result<Vec<u8>> {
	let field_size = elliptic_curve::FieldBytesSize::<p256::NistP256>::to_usize();
	let bytes = i.to_bytes_be().1;
	if bytes.len() > field_size {
		return Err(Error::WrongPublicKeyLength { expected: field_size, got: bytes.len() });
	}
	let mut res = vec![0; field_size - bytes.len()];
	res.extend_from_slice(&bytes);
	Ok(res)
}

/// Unwrap the outer sequence of a tomcrypt key.
///
/// Returns the inner blocks, the number of flag bits and if the private key
/// flag is set.
fn tomcrypt_sequence(data: &[u8]) -> Result<(Vec<ASN1Block>, usize, bool)> {
	let mut blocks = simple_asn1::from_der(data)?;
	if blocks.len() != 1 {
		return Err(Error::TooManyAsn1Blocks);
	}
	let ASN1Block::Sequence(_, inner) = blocks.remove(0) else {
		return Err(Error::ExpectedSequence);
	};
	let (bits, private) = match inner.first() {
		Some(ASN1Block::BitString(_, bits, flags)) => {
			(*bits, flags.first().map_or(false, |f| f & 0x80 != 0))
		}
		_ => return Err(Error::ExpectedBitString),
	};
	Ok((inner, bits, private))
}

fn integer_at(blocks: &[ASN1Block], i: usize) -> Option<&BigInt> {
	match blocks.get(i) {
		Some(ASN1Block::Integer(_, v)) => Some(v),
		_ => None,
	}
}

fn xor_static(data: &mut [u8]) {
	for (d, k) in data.iter_mut().zip(&IDENTITY_OBFUSCATION[..100]) {
		*d ^= k;
	}
}

/// Xor the first 20 bytes with the hash of the rest up to the first NUL.
fn xor_tail_hash(data: &mut [u8]) {
	let tail = data.get(20..).unwrap_or_default();
	let end = tail.iter().position(|b| *b == 0).unwrap_or(tail.len());
	let hash = sha1(&tail[..end]);
	for (d, h) in data.iter_mut().zip(&hash) {
		*d ^= h;
	}
}

fn deserialize_ecc_key_pub_p256<'de, D: Deserializer<'de>>(
	de: D,
) -> Result<p256::PublicKey, D::Error> {
	let data: Vec<u8> = Deserialize::deserialize(de)?;
	Ok(EccKeyPubP256::from_short(&data).map_err(serde::de::Error::custom)?.0)
}

fn serialize_ecc_key_pub_p256<S: Serializer>(
	key: &p256::PublicKey, ser: S,
) -> Result<S::Ok, S::Error> {
	Serialize::serialize(&EccKeyPubP256(*key).to_short().as_slice(), ser)
}

impl fmt::Debug for EccKeyPubP256 {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		match self.to_ts() {
			Ok(ts) => write!(f, "EccKeyPubP256({})", ts),
			Err(_) => write!(f, "EccKeyPubP256({})", BASE64_STANDARD.encode(self.to_short())),
		}
	}
}

impl fmt::Debug for EccKeyPrivP256 {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "EccKeyPrivP256({})", BASE64_STANDARD.encode(self.to_short()))
	}
}

impl fmt::Debug for EccKeyPubEd25519 {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "EccKeyPubEd25519({})", self.to_base64())
	}
}

impl fmt::Debug for EccKeyPrivEd25519 {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "EccKeyPrivEd25519({})", self.to_base64())
	}
}

impl EccKeyPubP256 {
	/// The shortest format of a public key.
	///
	/// This is just the `BigNum` of the x and y coordinates concatenated in
	/// this order. Each of the coordinates takes half of the size.
	pub fn from_short(data: &[u8]) -> Result<Self> {
		p256::PublicKey::from_sec1_bytes(data).map_err(|_| Error::ParsePublicKeyFailed).map(Self)
	}

	/// From base64 encoded tomcrypt key.
	pub fn from_ts(data: &str) -> Result<Self> {
		Self::from_tomcrypt(&BASE64_STANDARD.decode(data)?)
	}

	/// Decodes the public key from an ASN.1 DER object how tomcrypt stores it.
	///
	/// The format is:
	/// - `BitString` where the first bit is 1 if the private key is contained
	/// - `Integer`: The key size (32)
	/// - `Integer`: X coordinate of the public key
	/// - `Integer`: Y coordinate of the public key
	pub fn from_tomcrypt(data: &[u8]) -> Result<Self> {
		let (blocks, bits, private) = tomcrypt_sequence(data)?;
		if bits != 1 || private {
			return Err(Error::UnexpectedPrivateKey);
		}
		let (x, y) = integer_at(&blocks, 2)
			.zip(integer_at(&blocks, 3))
			.ok_or(Error::PublicKeyNotFound)?;
		let (x, y) = (field_bytes(x)?, field_bytes(y)?);
		let point = p256::EncodedPoint::from_affine_coordinates(
			GenericArray::from_slice(&x),
			GenericArray::from_slice(&y),
			false,
		);
		Option::from(p256::PublicKey::from_encoded_point(&point))
			.map(Self)
			.ok_or(Error::ParsePublicKeyFailed)
	}

	/// Convert to base64 encoded public tomcrypt key.
	///
	/// This is the `omega` of the handshake.
	pub fn to_ts(&self) -> Result<String> { Ok(BASE64_STANDARD.encode(self.to_tomcrypt()?)) }

	pub fn to_tomcrypt(&self) -> Result<Vec<u8>> {
		let (pubkey_x, pubkey_y) = affine_coordinates(&self.0)?;
		Ok(simple_asn1::to_der(&ASN1Block::Sequence(0, vec![
			ASN1Block::BitString(0, 1, vec![0]),
			ASN1Block::Integer(0, 32.into()),
			ASN1Block::Integer(0, pubkey_x),
			ASN1Block::Integer(0, pubkey_y),
		]))?)
	}

	/// Get the SEC1 encoding of the public key point on the curve.
	pub fn to_short(&self) -> Vec<u8> {
		// Uncompressed, identities are stored in this form
		self.0.as_affine().to_encoded_point(false).as_bytes().to_vec()
	}

	/// Compute the uid of this key without encoding it in base64.
	///
	/// returns sha1(ts encoded key)
	pub fn get_uid_no_base64(&self) -> Result<[u8; 20]> { Ok(sha1(self.to_ts()?.as_bytes())) }

	/// Compute the uid of this key.
	///
	/// Uid = base64(sha1(ts encoded key))
	pub fn get_uid(&self) -> Result<String> {
		Ok(BASE64_STANDARD.encode(self.get_uid_no_base64()?))
	}

	pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<()> {
		let sig =
			p256::ecdsa::Signature::from_der(signature).map_err(|_| Error::WrongSignature {
				key: self.clone(),
				data: data.to_vec(),
				signature: signature.to_vec(),
			})?;
		let key = p256::ecdsa::VerifyingKey::from(&self.0);
		key.verify(data, &sig).map_err(|_| Error::WrongSignature {
			key: self.clone(),
			data: data.to_vec(),
			signature: signature.to_vec(),
		})
	}
}

fn affine_coordinates(key: &p256::PublicKey) -> Result<(BigInt, BigInt)> {
	let enc_point = key.as_affine().to_encoded_point(false);
	match (enc_point.x(), enc_point.y()) {
		(Some(x), Some(y)) => {
			Ok((BigInt::from_bytes_be(Sign::Plus, x), BigInt::from_bytes_be(Sign::Plus, y)))
		}
		_ => Err(Error::ParsePublicKeyFailed),
	}
}

impl EccKeyPrivP256 {
	/// Create a new key key pair.
	pub fn create() -> Self { Self(p256::SecretKey::random(&mut rand::thread_rng())) }

	/// Try to import the key from any of the known formats.
	pub fn import(data: &[u8]) -> Result<Self> {
		if data.is_empty() {
			return Err(Error::EmptyKeyData);
		}

		if let Ok(s) = str::from_utf8(data) {
			if let Ok(r) = Self::import_str(s) {
				return Ok(r);
			}
		}
		if let Ok(r) = Self::from_tomcrypt(data) {
			return Ok(r);
		}
		if let Ok(r) = Self::from_short(data) {
			return Ok(r);
		}
		Err(Error::KeyDecodeError)
	}

	/// Try to import the key from any of the known formats.
	pub fn import_str(s: &str) -> Result<Self> {
		if let Ok(r) = BASE64_STANDARD.decode(s) {
			if let Ok(r) = Self::import(&r) {
				return Ok(r);
			}
		}
		if let Ok(r) = Self::from_ts_obfuscated(s) {
			return Ok(r);
		}
		Err(Error::KeyDecodeError)
	}

	/// The shortest format of a private key.
	///
	/// This is just the `BigNum` of the private key.
	pub fn from_short(data: &[u8]) -> Result<Self> {
		// from_bytes panics on other lengths
		if data.len() != 32 {
			Err(Error::NoShortKey)
		} else {
			Ok(Self(
				p256::SecretKey::from_bytes(p256::FieldBytes::from_slice(data))
					.map_err(|_| Error::NoShortKey)?,
			))
		}
	}

	/// The shortest format of a private key.
	///
	/// This is just the `BigNum` of the private key.
	pub fn to_short(&self) -> elliptic_curve::FieldBytes<p256::NistP256> { self.0.to_bytes() }

	/// From base64 encoded tomcrypt key.
	pub fn from_ts(data: &str) -> Result<Self> {
		Self::from_tomcrypt(&BASE64_STANDARD.decode(data)?)
	}

	/// From the key representation which is used to store identities in the
	/// TeamSpeak configuration file.
	///
	/// Format: Offset for identity level || 'V' || obfuscated key
	///
	/// This function takes only the obfuscated key without the level.
	///
	/// Thanks to landave, who put
	/// [his deobfuscation code](https://github.com/landave/TSIdentityTool)
	/// under the MIT license.
	pub fn from_ts_obfuscated(data: &str) -> Result<Self> {
		let mut data = BASE64_STANDARD.decode(data)?;
		if data.len() < 20 {
			return Err(Error::NoObfuscatedKey);
		}
		xor_tail_hash(&mut data);
		xor_static(&mut data);
		Self::from_ts(str::from_utf8(&data)?)
	}

	/// Decodes the private key from an ASN.1 DER object how tomcrypt stores it.
	///
	/// The format is:
	/// - `BitString` where the first bit is 1 if the private key is contained
	/// - `Integer`: The key size (32)
	/// - `Integer`: X coordinate of the public key
	/// - `Integer`: Y coordinate of the public key
	/// - `Integer`: Private key
	///
	/// The TS3AudioBot stores two 1 bits in the first `BitString` and omits the
	/// public key.
	pub fn from_tomcrypt(data: &[u8]) -> Result<Self> {
		let (blocks, bits, private) = tomcrypt_sequence(data)?;
		if !private {
			return Err(Error::NoPrivateKey);
		}
		let index = match bits {
			1 => 4,
			// Without public key
			2 => 2,
			_ => return Err(Error::NoPrivateKey),
		};
		let key = integer_at(&blocks, index).ok_or(Error::NoPrivateKey)?;
		Self::from_short(&field_bytes(key)?)
	}

	/// Convert to base64 encoded private tomcrypt key.
	pub fn to_ts(&self) -> Result<String> { Ok(BASE64_STANDARD.encode(self.to_tomcrypt()?)) }

	/// Store as obfuscated TeamSpeak identity.
	pub fn to_ts_obfuscated(&self) -> Result<String> {
		let mut data = self.to_ts()?.into_bytes();
		xor_static(&mut data);
		xor_tail_hash(&mut data);
		Ok(BASE64_STANDARD.encode(data))
	}

	pub fn to_tomcrypt(&self) -> Result<Vec<u8>> {
		let (pubkey_x, pubkey_y) = affine_coordinates(&self.0.public_key())?;
		let privkey = BigInt::from_bytes_be(Sign::Plus, &self.0.to_bytes());

		Ok(simple_asn1::to_der(&ASN1Block::Sequence(0, vec![
			ASN1Block::BitString(0, 1, vec![0x80]),
			ASN1Block::Integer(0, 32.into()),
			ASN1Block::Integer(0, pubkey_x),
			ASN1Block::Integer(0, pubkey_y),
			ASN1Block::Integer(0, privkey),
		]))?)
	}

	/// This has to be the private key, the other one has to be the public key.
	pub fn create_shared_secret(
		&self, other: &EccKeyPubP256,
	) -> elliptic_curve::ecdh::SharedSecret<p256::NistP256> {
		elliptic_curve::ecdh::diffie_hellman(self.0.to_nonzero_scalar(), other.0.as_affine())
	}

	/// ECDSA signature over SHA-256, DER encoded.
	pub fn sign(&self, data: &[u8]) -> Vec<u8> {
		let key = p256::ecdsa::SigningKey::from(&self.0);
		let sig: p256::ecdsa::DerSignature = key.sign(data);
		sig.as_bytes().to_vec()
	}

	pub fn to_pub(&self) -> EccKeyPubP256 { self.into() }
}

impl<'a> From<&'a EccKeyPrivP256> for EccKeyPubP256 {
	fn from(priv_key: &'a EccKeyPrivP256) -> Self { Self(priv_key.0.public_key()) }
}

fn decode_32(data: &str) -> Result<[u8; 32]> {
	let decoded = BASE64_STANDARD.decode(data)?;
	if decoded.len() != 32 {
		return Err(Error::WrongKeyLength);
	}
	let mut res = [0; 32];
	res.copy_from_slice(&decoded);
	Ok(res)
}

impl EccKeyPubEd25519 {
	pub fn from_bytes(data: [u8; 32]) -> Self { EccKeyPubEd25519(CompressedEdwardsY(data)) }

	pub fn from_base64(data: &str) -> Result<Self> { Ok(Self::from_bytes(decode_32(data)?)) }

	pub fn to_bytes(&self) -> [u8; 32] { self.0 .0 }

	pub fn decompress(&self) -> Option<EdwardsPoint> { self.0.decompress() }

	pub fn to_base64(&self) -> String {
		let EccKeyPubEd25519(CompressedEdwardsY(ref data)) = *self;
		BASE64_STANDARD.encode(data)
	}
}

impl EccKeyPrivEd25519 {
	/// This is not used to create TeamSpeak keys, as they are not canonical.
	pub fn create() -> Self { EccKeyPrivEd25519(Scalar::random(&mut rand::thread_rng())) }

	pub fn from_base64(data: &str) -> Result<Self> { Ok(Self::from_bytes(decode_32(data)?)) }

	/// The scalar is not reduced, only the highest bit is cleared.
	pub fn from_bytes(data: [u8; 32]) -> Self { EccKeyPrivEd25519(Scalar::from_bits(data)) }

	pub fn to_bytes(&self) -> [u8; 32] { self.0.to_bytes() }

	pub fn to_base64(&self) -> String { BASE64_STANDARD.encode(self.0.as_bytes()) }

	/// This has to be the private key, the other one has to be the public key.
	///
	/// Returns the compressed point.
	pub fn create_shared_secret(&self, pub_key: &EdwardsPoint) -> [u8; 32] {
		let res = pub_key * self.0;
		res.compress().0
	}

	pub fn to_pub(&self) -> EccKeyPubEd25519 { self.into() }
}

impl<'a> From<&'a EccKeyPrivEd25519> for EccKeyPubEd25519 {
	fn from(priv_key: &'a EccKeyPrivEd25519) -> Self {
		Self((&constants::ED25519_BASEPOINT_TABLE * &priv_key.0).compress())
	}
}

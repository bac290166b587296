//! Handle packet cryptography and the handshake computations.
use curve25519_dalek_ng::edwards::EdwardsPoint;
use num_bigint::BigUint;
use num_traits::One;
use tsbot_packets::packets::*;
use tsbot_types::crypto::{sha1, sha256, EccKeyPrivEd25519};
use tsbot_types::eax;

use crate::license::get_shared_secret2;
use crate::{Error, Result, FAKE_KEY, FAKE_NONCE, MAX_PUZZLE_LEVEL};

/// The iv which is computed in the handshake.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SharedIv {
	/// Before protocol 3.1, derived from a P-256 shared secret.
	ProtocolOrig([u8; 20]),
	/// Derived from the license chain and an ephemeral key.
	Protocol31([u8; 64]),
}

impl SharedIv {
	pub fn as_bytes(&self) -> &[u8] {
		match self {
			SharedIv::ProtocolOrig(d) => d,
			SharedIv::Protocol31(d) => d,
		}
	}
}

pub fn must_encrypt(t: PacketType) -> bool { t.is_command() }

pub fn should_encrypt(t: PacketType, voice_encryption: bool) -> bool {
	must_encrypt(t) || t.is_ack() || (voice_encryption && t.is_voice())
}

/// Compute the key and nonce for a packet.
///
/// The result depends on every argument, there is no cache, so packets of the
/// same generation hash the iv again.
pub fn create_key_nonce(
	dir: Direction, p_type: PacketType, p_id: u16, generation_id: u32, iv: &SharedIv,
) -> ([u8; 16], [u8; 16]) {
	let mut temp = [0; 70];
	temp[0] = if dir == Direction::C2S { 0x31 } else { 0x30 };
	temp[1] = p_type as u8;
	temp[2..6].copy_from_slice(&generation_id.to_be_bytes());
	let iv = iv.as_bytes();
	temp[6..6 + iv.len()].copy_from_slice(iv);

	let keynonce = sha256(&temp[..6 + iv.len()]);
	let mut key = [0; 16];
	let mut nonce = [0; 16];
	key.copy_from_slice(&keynonce[..16]);
	nonce.copy_from_slice(&keynonce[16..]);
	key[0] ^= (p_id >> 8) as u8;
	key[1] ^= (p_id & 0xff) as u8;
	(key, nonce)
}

pub fn encrypt_key_nonce(packet: &mut OutPacket, key: &[u8; 16], nonce: &[u8; 16]) {
	let (meta, content) = packet.split_meta_mut();
	let mac = eax::encrypt(key, nonce, meta, content);
	packet.mac().copy_from_slice(&mac);
}

/// Encrypt with the fixed key that is used before the handshake finished.
pub fn encrypt_fake(packet: &mut OutPacket) { encrypt_key_nonce(packet, &FAKE_KEY, &FAKE_NONCE) }

pub fn encrypt(packet: &mut OutPacket, generation_id: u32, iv: &SharedIv) {
	let header = packet.header();
	let (key, nonce) = create_key_nonce(
		packet.direction(),
		header.packet_type(),
		header.packet_id(),
		generation_id,
		iv,
	);
	encrypt_key_nonce(packet, &key, &nonce)
}

/// Decrypt the content in-place. It is left unchanged if the mac is wrong.
pub fn decrypt_key_nonce(
	packet: &mut InPacket, generation_id: u32, key: &[u8; 16], nonce: &[u8; 16],
) -> Result<()> {
	let (header, content) = packet.split_mut();
	eax::decrypt(key, nonce, header.get_meta(), content, header.mac()).map_err(|_| {
		Error::WrongMac {
			p_type: header.packet_type(),
			generation: generation_id,
			p_id: header.packet_id(),
		}
	})
}

pub fn decrypt_fake(packet: &mut InPacket) -> Result<()> {
	decrypt_key_nonce(packet, 0, &FAKE_KEY, &FAKE_NONCE)
}

pub fn decrypt(packet: &mut InPacket, generation_id: u32, iv: &SharedIv) -> Result<()> {
	let header = packet.header();
	let (key, nonce) = create_key_nonce(
		packet.direction(),
		header.packet_type(),
		header.packet_id(),
		generation_id,
		iv,
	);
	decrypt_key_nonce(packet, generation_id, &key, &nonce)
}

/// Compute shared iv and shared mac.
///
/// The shared secret is hashed, then `alpha` and `beta` are xored into the
/// result.
pub fn compute_iv_mac31(
	alpha: &[u8; 10], beta: &[u8; 54], our_key: &EccKeyPrivEd25519, other_key: &EdwardsPoint,
) -> ([u8; 64], [u8; 8]) {
	let mut shared_iv = get_shared_secret2(other_key, our_key);
	for (i, a) in alpha.iter().enumerate() {
		shared_iv[i] ^= a;
	}
	for (i, b) in beta.iter().enumerate() {
		shared_iv[i + 10] ^= b;
	}
	let mut shared_mac = [0; 8];
	shared_mac.copy_from_slice(&sha1(&shared_iv)[..8]);
	(shared_iv, shared_mac)
}

pub fn biguint_to_array(i: &BigUint) -> Result<[u8; 64]> {
	let v = i.to_bytes_be();
	if v.len() > 64 {
		return Err(Error::MaxLengthExceeded("RSA puzzle result".into()));
	}
	let mut a = [0; 64];
	a[64 - v.len()..].copy_from_slice(&v);
	Ok(a)
}

/// Solve the RSA puzzle of `Init3`: `y = x ^ (2 ^ level) mod n`.
pub fn solve_puzzle(x: &[u8; 64], n: &[u8; 64], level: u32) -> Result<[u8; 64]> {
	if level > MAX_PUZZLE_LEVEL {
		return Err(Error::PuzzleLevelTooHigh(level));
	}
	let n = BigUint::from_bytes_be(n);
	if n <= BigUint::one() {
		return Err(Error::Handshake("Invalid RSA puzzle modulus".into()));
	}
	let x = BigUint::from_bytes_be(x);
	let e = BigUint::one() << level as usize;
	biguint_to_array(&x.modpow(&e, &n))
}

#[cfg(test)]
mod tests {
	use base64::prelude::*;

	use super::*;
	use crate::context::CryptoContext;
	use crate::license::Licenses;

	fn to_in(packet: OutPacket) -> InPacket {
		let dir = packet.direction();
		InPacket::try_new(packet.into_vec(), dir).unwrap()
	}

	#[test]
	fn fake_crypt() {
		let data = (0..100).collect::<Vec<u8>>();
		let mut packet = OutPacket::new_with_dir(Direction::C2S, Flags::empty(), PacketType::Ack);
		packet.data_mut().extend_from_slice(&data);
		encrypt_fake(&mut packet);
		assert_ne!(packet.content(), &data[..]);

		let mut packet = to_in(packet);
		decrypt_fake(&mut packet).unwrap();
		assert_eq!(packet.content(), &data[..]);
	}

	#[test]
	fn fake_encrypt() {
		let mut packet = OutAck::new(Direction::C2S, PacketType::Command, 0).unwrap();
		encrypt_fake(&mut packet);

		let real_res: &[u8] =
			&[0xa4, 0x7b, 0x47, 0x94, 0xdb, 0xa9, 0x6a, 0xc5, 0, 0, 0, 0, 0x6, 0xfe, 0x18];
		assert_eq!(real_res, packet.data());
	}

	#[test]
	fn wrong_mac() {
		let iv = SharedIv::Protocol31([3; 64]);
		let mut packet =
			OutCommand::from_raw(Direction::S2C, PacketType::Command, "notifyclientupdated");
		packet.packet_id(7);
		encrypt(&mut packet, 0, &iv);
		let encrypted = packet.content().to_vec();

		// The generation is part of the key
		let mut p = to_in(packet.clone());
		match decrypt(&mut p, 1, &iv) {
			Err(Error::WrongMac { p_type: PacketType::Command, generation: 1, p_id: 7 }) => {}
			r => panic!("Expected wrong mac, got {:?}", r),
		}
		assert_eq!(p.content(), &encrypted[..]);

		let mut p = to_in(packet);
		decrypt(&mut p, 0, &iv).unwrap();
		assert_eq!(p.content(), b"notifyclientupdated");
	}

	#[test]
	fn key_nonce_inputs() {
		let iv = SharedIv::Protocol31([0x17; 64]);
		let base = create_key_nonce(Direction::C2S, PacketType::Command, 5, 0, &iv);
		assert_eq!(base, create_key_nonce(Direction::C2S, PacketType::Command, 5, 0, &iv));

		let others = [
			create_key_nonce(Direction::S2C, PacketType::Command, 5, 0, &iv),
			create_key_nonce(Direction::C2S, PacketType::CommandLow, 5, 0, &iv),
			create_key_nonce(Direction::C2S, PacketType::Command, 6, 0, &iv),
			create_key_nonce(Direction::C2S, PacketType::Command, 5, 1, &iv),
			create_key_nonce(
				Direction::C2S,
				PacketType::Command,
				5,
				0,
				&SharedIv::Protocol31([0x18; 64]),
			),
		];
		for o in &others {
			assert_ne!(&base, o);
		}
		// The packet id only changes the key
		assert_eq!(base.1, others[2].1);
	}

	#[test]
	fn key_nonce_orig_iv() {
		let data = [0x42; 20];
		let iv = SharedIv::ProtocolOrig(data);
		let (key, nonce) = create_key_nonce(Direction::S2C, PacketType::Ack, 0, 2, &iv);

		let mut temp = vec![0x30, 6, 0, 0, 0, 2];
		temp.extend_from_slice(&data);
		assert_eq!(temp.len(), 26);
		let hash = sha256(&temp);
		assert_eq!(&key[..], &hash[..16]);
		assert_eq!(&nonce[..], &hash[16..]);
	}

	#[test]
	fn puzzle() {
		let mut x = [0; 64];
		x[63] = 3;
		let mut n = [0; 64];
		n[63] = 7;
		// 3 ^ (2 ^ 3) = 6561 = 937 * 7 + 2
		let y = solve_puzzle(&x, &n, 3).unwrap();
		assert_eq!(y[63], 2);
		assert!(y[..63].iter().all(|b| *b == 0));

		assert!(matches!(
			solve_puzzle(&x, &n, MAX_PUZZLE_LEVEL + 1),
			Err(Error::PuzzleLevelTooHigh(_))
		));
	}

	#[test]
	fn shared_iv31() {
		let licenses = Licenses::parse_ignore_expired(
			&BASE64_STANDARD
				.decode(
					"AQA1hUFJiiSs0wFXkYuPUJVcDa6XCrZTcsvkB0Ffzz4CmwIITRXgCqeTYAcAAAAgQW5vbnltb3VzAA\
					 C4R+5mos+UQ/KCbkpQLMI5WRp4wkQu8e5PZY4zU+/FlyAJwaE8CcJJ/A==",
				)
				.unwrap(),
		)
		.unwrap();
		let derived_key = licenses.derive_public_key(&CryptoContext::default()).unwrap();

		let client_ek = [
			0xb0, 0x4e, 0xa1, 0xd9, 0x5c, 0x72, 0x64, 0xdf, 0x0d, 0xe8, 0xb3, 0x6b, 0xaa, 0x7c,
			0xa1, 0x5f, 0x75, 0x71, 0xf5, 0x1f, 0xa0, 0x54, 0xb5, 0x51, 0x27, 0x08, 0x8e, 0xdd,
			0x96, 0x3d, 0x6e, 0x79,
		];
		let priv_key = EccKeyPrivEd25519::from_bytes(client_ek);

		let mut alpha = [0; 10];
		alpha.copy_from_slice(&BASE64_STANDARD.decode("Jkxq1wIvvhzaCA==").unwrap());
		let mut beta = [0; 54];
		beta.copy_from_slice(
			&BASE64_STANDARD
				.decode("wU5T/MM6toW6Wge9th7VlTlzVZ9JDWypw2P9migfc25pjGP2Tj7Hm6rJpmKeHRr08Ch7BEAR")
				.unwrap(),
		);

		let expected_shared_iv: [u8; 64] = [
			0x58, 0x78, 0xae, 0x08, 0x08, 0x72, 0x05, 0xb0, 0x13, 0x27, 0x10, 0xe9, 0x81, 0xb4,
			0xaf, 0x14, 0x14, 0x71, 0xad, 0xcd, 0x82, 0x98, 0xf3, 0xd1, 0x1d, 0x07, 0x20, 0x72,
			0x7e, 0xb2, 0x1b, 0x89, 0x47, 0x82, 0x1e, 0xfb, 0x02, 0x53, 0x5a, 0x8a, 0x52, 0x4d,
			0x9a, 0x7a, 0x09, 0x2c, 0x1b, 0xe7, 0x1f, 0xd1, 0x9d, 0x2a, 0x9d, 0x4f, 0xbd, 0xe3,
			0x22, 0x09, 0xe4, 0x86, 0x7d, 0x63, 0x49, 0x07,
		];
		let expected_xored_shared_iv: [u8; 64] = [
			0x7e, 0x34, 0xc4, 0xdf, 0x0a, 0x5d, 0xbb, 0xac, 0xc9, 0x2f, 0xd1, 0xa7, 0xd2, 0x48,
			0x6c, 0x2e, 0xa2, 0xf4, 0x17, 0x97, 0x85, 0x25, 0x45, 0xcf, 0xc8, 0x92, 0x19, 0x01,
			0x2b, 0x2d, 0x52, 0x84, 0x2b, 0x2b, 0xdd, 0x98, 0xff, 0xc9, 0x72, 0x95, 0x21, 0x23,
			0xf3, 0xf6, 0x6a, 0xda, 0x55, 0xd9, 0xd8, 0x4a, 0x37, 0xe3, 0x3b, 0x2d, 0x23, 0xfe,
			0x38, 0xfd, 0x14, 0xae, 0x06, 0x67, 0x09, 0x16,
		];

		let shared_secret = get_shared_secret2(&derived_key, &priv_key);
		assert_eq!(&shared_secret[..], &expected_shared_iv[..]);

		let (shared_iv, shared_mac) =
			compute_iv_mac31(&alpha, &beta, &priv_key, &derived_key);
		assert_eq!(&shared_iv[..], &expected_xored_shared_iv[..]);
		assert_eq!(&shared_mac[..], &sha1(&shared_iv)[..8]);

		// clientinit is the second command of the client
		let iv = SharedIv::Protocol31(shared_iv);
		let (key, nonce) = create_key_nonce(Direction::C2S, PacketType::Command, 2, 0, &iv);
		assert_eq!(key, [
			0xf3, 0x72, 0xd3, 0x43, 0xe7, 0x78, 0x15, 0x70, 0x7a, 0xff, 0x60, 0x48, 0xfb, 0xd9,
			0xac, 0x6b,
		]);
		assert_eq!(nonce, [
			0xb6, 0x33, 0x35, 0x79, 0x31, 0x9b, 0x88, 0x0e, 0x2d, 0x25, 0xef, 0x9c, 0xe9, 0x9e,
			0x77, 0x5c,
		]);

		let (key, nonce) = create_key_nonce(Direction::S2C, PacketType::Command, 1, 0, &iv);
		assert_eq!(key, [
			0x10, 0xa9, 0xce, 0x53, 0x23, 0xfc, 0xa2, 0x00, 0xbe, 0x79, 0x3a, 0xa1, 0x6e, 0x86,
			0x47, 0x0e,
		]);
		assert_eq!(nonce, [
			0x91, 0x0f, 0x01, 0xc2, 0x4d, 0xa0, 0xb0, 0xa4, 0xf6, 0x7f, 0xf4, 0x80, 0xf3, 0xdd,
			0xfd, 0x0d,
		]);
	}
}

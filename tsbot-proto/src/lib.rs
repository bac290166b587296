//! This library implements the transport and cryptography core of the
//! TeamSpeak protocol, as far as a bot needs it to join a server as a real
//! client.
//!
//! All packets are encrypted with keys derived from a handshake that uses an
//! RSA puzzle, a license chain over Ed25519 points and P-256 signatures.
//! Command packets are delivered reliably and in order, big commands are
//! fragmented and may be compressed with QuickLZ.
//!
//! The entry point is [`client::Client`].

use std::borrow::Cow;

use thiserror::Error;
use tsbot_packets::packets::PacketType;

pub mod algorithms;
pub mod client;
pub mod config;
pub mod connection;
pub mod context;
pub mod identity;
pub mod license;
pub mod log;
pub mod packet_codec;
pub mod quicklz;
pub mod resend;
pub mod utils;

pub use tsbot_packets::HexSlice;

type Result<T, E = Error> = std::result::Result<T, E>;

/// The maximum number of bytes for a fragmented packet.
#[allow(clippy::unreadable_literal)]
pub const MAX_FRAGMENTS_LENGTH: usize = 40960;
/// The maximum number of packets which are stored, if they are received
/// out-of-order.
pub const MAX_QUEUE_LEN: u16 = 50;
/// The maximum decompressed size of a packet.
#[allow(clippy::unreadable_literal)]
pub const MAX_DECOMPRESSED_SIZE: u32 = 40960;
/// The maximum size of a packet including the header.
pub const MAX_PACKET_LENGTH: usize = 500;
/// The largest udp packet that can be received.
pub const MAX_UDP_PACKET_LENGTH: usize = 500;
/// How many acks can be queued before receiving more packets is paused.
pub const UDP_SINK_CAPACITY: usize = 50;
/// Consecutive packets with a wrong mac before the connection is closed.
pub const MAX_MAC_FAILURES: u32 = 5;
/// The highest RSA puzzle level that is solved.
pub const MAX_PUZZLE_LEVEL: u32 = 10_000_000;
pub const FAKE_KEY: [u8; 16] = *b"c:\\windows\\syste";
pub const FAKE_NONCE: [u8; 16] = *b"m\\firewall32.cpl";
/// The root key of the TeamSpeak license chain.
pub const ROOT_KEY: [u8; 32] = [
	0xcd, 0x0d, 0xe2, 0xae, 0xd4, 0x63, 0x45, 0x50, 0x9a, 0x7e, 0x3c, 0xfd, 0x8f, 0x68, 0xb3,
	0xdc, 0x75, 0x55, 0xb2, 0x9d, 0xcc, 0xec, 0x73, 0xcd, 0x18, 0x75, 0x0f, 0x99, 0x38, 0x12,
	0x40, 0x8a,
];
/// Offset of license timestamps to unix time.
pub const TIMESTAMP_OFFSET: i64 = 0x50e2_2700;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
	#[error(transparent)]
	Base64(#[from] base64::DecodeError),
	#[error(transparent)]
	Crypto(#[from] tsbot_types::crypto::Error),
	#[error(transparent)]
	Io(#[from] std::io::Error),
	#[error(transparent)]
	Join(#[from] tokio::task::JoinError),
	#[error(transparent)]
	Packets(#[from] tsbot_packets::Error),
	#[error(transparent)]
	ParseInt(#[from] std::num::ParseIntError),
	#[error(transparent)]
	Time(#[from] time::error::ComponentRange),
	#[error(transparent)]
	Toml(#[from] toml::de::Error),
	#[error(transparent)]
	Utf8(#[from] std::str::Utf8Error),

	#[error("Cannot decompress packet: {0}")]
	Decompress(&'static str),
	#[error("Unsupported QuickLZ compression level {0}")]
	UnsupportedCompressionLevel(u8),
	#[error("Decompressed size {size} is larger than the allowed {max} bytes")]
	DecompressedSizeTooLarge { size: u32, max: u32 },
	#[error("Maximum length exceeded for {0}")]
	MaxLengthExceeded(Cow<'static, str>),

	#[error("Unsupported license version {0}")]
	LicenseVersion(u8),
	#[error("License block is too short ({0} bytes)")]
	LicenseTooShort(usize),
	#[error("Wrong key kind {0} in license")]
	LicenseKeyKind(u8),
	#[error("Invalid license block type {0}")]
	LicenseBlockType(u8),
	#[error("Unknown license type {0}")]
	LicenseType(u8),
	#[error("License contains a non-null-terminated string")]
	LicenseString,
	#[error("License key is not a valid point")]
	LicenseKey,
	#[error("License is not valid at this time")]
	LicenseExpired,
	#[error("Time {0} cannot be stored in a license")]
	InvalidLicenseTime(time::OffsetDateTime),

	#[error("Packet {p_id} (generation {generation}) of type {p_type:?} has a wrong mac")]
	WrongMac { p_type: PacketType, generation: u32, p_id: u16 },
	#[error("Wrong signature")]
	WrongSignature,
	#[error("Too many packets with a wrong mac")]
	TooManyMacFailures,
	#[error("Packet {id} not in receive window [{next};{limit}) for type {p_type:?}")]
	NotInReceiveWindow { id: u16, next: u16, limit: u16, p_type: PacketType },
	#[error("Got unallowed unencrypted packet")]
	UnallowedUnencryptedPacket,
	#[error("Got unexpected init packet")]
	UnexpectedInitPacket,
	#[error("Received udp packet from wrong address")]
	WrongAddress,

	#[error("Handshake failed: {0}")]
	Handshake(Cow<'static, str>),
	#[error("RSA puzzle level {0} is too high")]
	PuzzleLevelTooHigh(u32),
	#[error("The identity has a too low security level, the server needs {needed}")]
	IdentityLevelTooLow { needed: u8 },
	#[error("Server error {id}: {msg}")]
	Server { id: u32, msg: String },
	#[error("Connection timed out ({0})")]
	Timeout(&'static str),
	#[error("Connection closed")]
	ConnectionClosed,
	#[error("Operation was cancelled")]
	Cancelled,
}

impl Error {
	/// A mac or signature did not match.
	pub fn is_auth_failure(&self) -> bool {
		matches!(
			self,
			Error::WrongMac { .. }
				| Error::WrongSignature
				| Error::TooManyMacFailures
				| Error::Crypto(tsbot_types::crypto::Error::WrongSignature { .. })
		)
	}

	/// Received data that could not be parsed.
	pub fn is_decode_failure(&self) -> bool {
		matches!(
			self,
			Error::Base64(_)
				| Error::Packets(_)
				| Error::ParseInt(_)
				| Error::Utf8(_)
				| Error::Decompress(_)
				| Error::UnsupportedCompressionLevel(_)
				| Error::LicenseVersion(_)
				| Error::LicenseTooShort(_)
				| Error::LicenseKeyKind(_)
				| Error::LicenseBlockType(_)
				| Error::LicenseType(_)
				| Error::LicenseString
				| Error::LicenseKey
		)
	}

	/// A configured limit was hit.
	pub fn is_resource_limit(&self) -> bool {
		matches!(
			self,
			Error::DecompressedSizeTooLarge { .. }
				| Error::MaxLengthExceeded(_)
				| Error::PuzzleLevelTooHigh(_)
		)
	}
}

use std::fmt;

use arrayref::{array_mut_ref, array_ref};
use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive as _;
use serde::{Deserialize, Serialize};

use crate::commands::{self, Command, CommandArg};
use crate::{Error, HexSlice, Result};

/// The mac of all init packets.
pub const INIT_MAC: &[u8; 8] = b"TS3INIT1";
/// The packet id of all init packets.
pub const INIT_PACKET_ID: u16 = 0x65;

#[derive(
	Clone, Copy, Debug, Deserialize, Eq, FromPrimitive, Hash, PartialEq, ToPrimitive, Serialize,
)]
#[repr(u8)]
pub enum PacketType {
	Voice,
	VoiceWhisper,
	Command,
	CommandLow,
	Ping,
	Pong,
	Ack,
	AckLow,
	Init,
}

#[derive(Clone, Copy, Deserialize, Debug, Eq, PartialEq, Hash, Serialize)]
pub enum Direction {
	/// Going from the server to the client.
	S2C,
	/// Going from the client to the server.
	C2S,
}

bitflags! {
	#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
	pub struct Flags: u8 {
		const UNENCRYPTED = 0x80;
		const COMPRESSED  = 0x40;
		const NEWPROTOCOL = 0x20;
		const FRAGMENTED  = 0x10;
	}
}

impl PacketType {
	pub fn is_command(self) -> bool { self == PacketType::Command || self == PacketType::CommandLow }
	pub fn is_ack(self) -> bool { self == PacketType::Ack || self == PacketType::AckLow }
	pub fn is_voice(self) -> bool { self == PacketType::Voice || self == PacketType::VoiceWhisper }

	/// The packet type which acknowledges this type.
	pub fn ack_type(self) -> Option<PacketType> {
		match self {
			PacketType::Command => Some(PacketType::Ack),
			PacketType::CommandLow => Some(PacketType::AckLow),
			PacketType::Ping => Some(PacketType::Pong),
			_ => None,
		}
	}

	/// The packet type which gets acknowledged by this type.
	pub fn acked_type(self) -> Option<PacketType> {
		match self {
			PacketType::Ack => Some(PacketType::Command),
			PacketType::AckLow => Some(PacketType::CommandLow),
			PacketType::Pong => Some(PacketType::Ping),
			_ => None,
		}
	}
}

impl Direction {
	pub fn reverse(self) -> Self {
		match self {
			Direction::S2C => Direction::C2S,
			Direction::C2S => Direction::S2C,
		}
	}

	#[inline]
	pub fn header_len(self) -> usize {
		match self {
			Direction::S2C => crate::S2C_HEADER_LEN,
			Direction::C2S => crate::C2S_HEADER_LEN,
		}
	}
}

/// A received packet.
///
/// The header was checked when the packet was created, so the accessors of
/// [`InHeader`] cannot fail.
#[derive(Clone)]
pub struct InPacket {
	data: Vec<u8>,
	dir: Direction,
}

#[derive(Clone, Copy)]
pub struct InHeader<'a>(&'a [u8], Direction);

/// Used for debugging.
pub struct InUdpPacket<'a>(&'a InPacket);

impl<'a> InUdpPacket<'a> {
	pub fn new(packet: &'a InPacket) -> Self { Self(packet) }
}

/// A command which arrived in one or more command packets.
#[derive(Clone, Debug)]
pub struct InCommand {
	command: Command,
	p_type: PacketType,
	newprotocol: bool,
	dir: Direction,
}

#[derive(Clone, Deserialize, Eq, PartialEq, Hash, Serialize)]
pub struct OutPacket {
	dir: Direction,
	data: Vec<u8>,
}

/// The mac has to be `b"TS3INIT1"`.
///
/// `version` always contains the Teamspeak version as timestamp.
///
/// `timestamp` contains a current timestamp.
#[derive(Clone, Debug)]
pub enum C2SInitData {
	Init0 {
		version: u32,
		timestamp: u32,
		random0: [u8; 4],
	},
	Init2 {
		version: u32,
		random1: [u8; 16],
		random0_r: [u8; 4],
	},
	Init4 {
		version: u32,
		x: [u8; 64],
		n: [u8; 64],
		level: u32,
		random2: [u8; 100],
		/// y = x ^ (2 ^ level) % n
		y: [u8; 64],
		/// Has to be a `clientinitiv alpha=… omega=…` command.
		command: Command,
	},
}

#[derive(Clone, Debug)]
pub enum S2CInitData {
	Init1 {
		random1: [u8; 16],
		random0_r: [u8; 4],
	},
	Init3 {
		x: [u8; 64],
		n: [u8; 64],
		level: u32,
		random2: [u8; 100],
	},
}

#[inline]
fn read_u16(data: &[u8], off: usize) -> u16 { u16::from_be_bytes(*array_ref!(data, off, 2)) }
#[inline]
fn read_u32(data: &[u8], off: usize) -> u32 { u32::from_be_bytes(*array_ref!(data, off, 4)) }

impl InPacket {
	/// Do some sanity checks before creating the object.
	pub fn try_new(data: Vec<u8>, dir: Direction) -> Result<Self> {
		let header_len = dir.header_len();
		if data.len() < header_len {
			return Err(Error::PacketTooShort(data.len()));
		}

		// Check packet type
		let p_type = data[header_len - 1] & 0xf;
		if PacketType::from_u8(p_type).is_none() {
			return Err(Error::UnknownPacketType(p_type));
		}

		Ok(Self { data, dir })
	}

	#[inline]
	fn header_data(&self) -> &[u8] { &self.data[..self.dir.header_len()] }

	/// Replace the content, e.g. with the decrypted data.
	#[inline]
	pub fn set_content(&mut self, content: &[u8]) {
		self.data.truncate(self.dir.header_len());
		self.data.extend_from_slice(content);
	}

	#[inline]
	pub fn content(&self) -> &[u8] { &self.data[self.dir.header_len()..] }
	#[inline]
	pub fn content_mut(&mut self) -> &mut [u8] {
		let off = self.dir.header_len();
		&mut self.data[off..]
	}

	#[inline]
	pub fn take_content(mut self) -> Vec<u8> { self.data.split_off(self.dir.header_len()) }

	/// Header and content at once, for in-place decryption.
	#[inline]
	pub fn split_mut(&mut self) -> (InHeader, &mut [u8]) {
		let (header, content) = self.data.split_at_mut(self.dir.header_len());
		(InHeader(header, self.dir), content)
	}

	#[inline]
	pub fn header(&self) -> InHeader { InHeader(self.header_data(), self.dir) }
	#[inline]
	pub fn direction(&self) -> Direction { self.dir }
	#[inline]
	pub fn data(&self) -> &[u8] { &self.data }

	/// Get the acknowledged packet id if this is an ack packet.
	#[inline]
	pub fn ack_packet(&self) -> Option<u16> {
		let p_type = self.header().packet_type();
		let content = self.content();
		if (p_type.is_ack() || p_type == PacketType::Pong) && content.len() >= 2 {
			Some(read_u16(content, 0))
		} else {
			None
		}
	}

	fn check_init(&self, dir: Direction) -> Result<()> {
		if self.dir != dir {
			return Err(Error::WrongDirection);
		}
		let header = self.header();
		if header.packet_type() != PacketType::Init {
			return Err(Error::WrongPacketType(header.packet_type()));
		}
		if header.mac() != INIT_MAC {
			return Err(Error::WrongInitMac(header.mac().to_vec()));
		}
		Ok(())
	}

	pub fn s2cinit(&self) -> Result<S2CInitData> {
		self.check_init(Direction::S2C)?;
		let content = self.content();
		match content.first() {
			None => Err(Error::PacketContentTooShort(0)),
			Some(1) => {
				if content.len() < 21 {
					return Err(Error::PacketContentTooShort(content.len()));
				}
				Ok(S2CInitData::Init1 {
					random1: *array_ref!(content, 1, 16),
					random0_r: *array_ref!(content, 17, 4),
				})
			}
			Some(3) => {
				if content.len() < 233 {
					return Err(Error::PacketContentTooShort(content.len()));
				}
				Ok(S2CInitData::Init3 {
					x: *array_ref!(content, 1, 64),
					n: *array_ref!(content, 65, 64),
					level: read_u32(content, 129),
					random2: *array_ref!(content, 133, 100),
				})
			}
			Some(step) => Err(Error::InvalidInitStep(*step)),
		}
	}

	pub fn c2sinit(&self) -> Result<C2SInitData> {
		self.check_init(Direction::C2S)?;
		let content = self.content();
		if content.len() < 5 {
			return Err(Error::PacketContentTooShort(content.len()));
		}

		let version = read_u32(content, 0);
		match content[4] {
			0 => {
				if content.len() < 13 {
					return Err(Error::PacketContentTooShort(content.len()));
				}
				Ok(C2SInitData::Init0 {
					version,
					timestamp: read_u32(content, 5),
					random0: *array_ref!(content, 9, 4),
				})
			}
			2 => {
				if content.len() < 25 {
					return Err(Error::PacketContentTooShort(content.len()));
				}
				Ok(C2SInitData::Init2 {
					version,
					random1: *array_ref!(content, 5, 16),
					random0_r: *array_ref!(content, 21, 4),
				})
			}
			4 => {
				let len = 5 + 128 + 4 + 100 + 64;
				if content.len() < len + 20 {
					return Err(Error::PacketContentTooShort(content.len()));
				}
				let s = std::str::from_utf8(&content[len..])?;
				let command = commands::parse(s)?;
				Ok(C2SInitData::Init4 {
					version,
					x: *array_ref!(content, 5, 64),
					n: *array_ref!(content, 69, 64),
					level: read_u32(content, 133),
					random2: *array_ref!(content, 137, 100),
					y: *array_ref!(content, 237, 64),
					command,
				})
			}
			step => Err(Error::InvalidInitStep(step)),
		}
	}
}

fn fmt_header(f: &mut fmt::Formatter, header: &InHeader) -> fmt::Result {
	write!(f, "mac: {}, ", HexSlice(header.mac()))?;
	write!(f, "p_id: {}, ", header.packet_id())?;
	if let Some(c_id) = header.client_id() {
		write!(f, "c_id: {}, ", c_id)?;
	}
	write!(f, "type: {:?}, ", header.packet_type())?;
	let flags = header.flags();
	write!(
		f,
		"flags: {}{}{}{}",
		if flags.contains(Flags::UNENCRYPTED) { "u" } else { "-" },
		if flags.contains(Flags::COMPRESSED) { "c" } else { "-" },
		if flags.contains(Flags::NEWPROTOCOL) { "n" } else { "-" },
		if flags.contains(Flags::FRAGMENTED) { "f" } else { "-" },
	)
}

impl fmt::Debug for InPacket {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "Packet {{ header: {{ ")?;
		fmt_header(f, &self.header())?;
		write!(f, " }}, content: {} }}", HexSlice(self.content()))
	}
}

impl<'a> fmt::Debug for InUdpPacket<'a> {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "UdpPacket {{ header: {{ ")?;
		fmt_header(f, &self.0.header())?;
		write!(f, " }}, raw: {} }}", HexSlice(self.0.data()))
	}
}

impl<'a> InHeader<'a> {
	/// The offset to the packet type.
	#[inline]
	fn get_off(&self) -> usize { self.1.header_len() - 1 }

	#[inline]
	pub fn direction(&self) -> Direction { self.1 }

	#[inline]
	pub fn mac(&self) -> &[u8; 8] { array_ref![self.0, 0, 8] }

	#[inline]
	pub fn packet_id(&self) -> u16 { read_u16(self.0, 8) }

	#[inline]
	pub fn client_id(&self) -> Option<u16> {
		if self.1 == Direction::S2C { None } else { Some(read_u16(self.0, 10)) }
	}

	#[inline]
	pub fn flags(&self) -> Flags { Flags::from_bits_truncate(self.0[self.get_off()] & 0xf0) }

	#[inline]
	pub fn packet_type(&self) -> PacketType {
		// Checked when the packet was created
		PacketType::from_u8(self.0[self.get_off()] & 0xf).unwrap_or(PacketType::Init)
	}

	/// The associated data for the packet encryption.
	///
	/// This is the header without the mac.
	pub fn get_meta(&self) -> &[u8] { &self.0[8..] }
}

impl InCommand {
	pub fn new(content: &[u8], p_type: PacketType, newprotocol: bool, dir: Direction) -> Result<Self> {
		let s = std::str::from_utf8(content)?;
		let command = commands::parse(s)?;
		Ok(Self { command, p_type, newprotocol, dir })
	}

	pub fn with_content(packet: &InPacket, content: &[u8]) -> Result<Self> {
		let header = packet.header();
		Self::new(
			content,
			header.packet_type(),
			header.flags().contains(Flags::NEWPROTOCOL),
			packet.dir,
		)
	}

	#[inline]
	pub fn packet_type(&self) -> PacketType { self.p_type }
	#[inline]
	pub fn newprotocol(&self) -> bool { self.newprotocol }
	#[inline]
	pub fn direction(&self) -> Direction { self.dir }
	#[inline]
	pub fn name(&self) -> &str { &self.command.name }
	#[inline]
	pub fn data(&self) -> &Command { &self.command }
	#[inline]
	pub fn into_command(self) -> Command { self.command }
}

impl OutPacket {
	#[inline]
	pub fn new(
		mac: [u8; 8], packet_id: u16, client_id: Option<u16>, flags: Flags, packet_type: PacketType,
	) -> Self {
		let dir = if client_id.is_some() { Direction::C2S } else { Direction::S2C };
		let mut res = Self::new_with_dir(dir, flags, packet_type);
		res.data[..8].copy_from_slice(&mac);
		res.packet_id(packet_id);
		if let Some(cid) = client_id {
			res.client_id(cid);
		}
		res
	}

	/// Fill packet with known data. The rest gets filled by `packet_codec`.
	#[inline]
	pub fn new_with_dir(dir: Direction, flags: Flags, packet_type: PacketType) -> Self {
		let data = vec![0; dir.header_len()];
		let mut res = Self { dir, data };
		res.flags(flags);
		res.packet_type(packet_type);
		res
	}

	#[inline]
	pub fn new_from_data(dir: Direction, data: Vec<u8>) -> Self { Self { dir, data } }

	#[inline]
	pub fn into_vec(self) -> Vec<u8> { self.data }

	#[inline]
	pub fn data(&self) -> &[u8] { &self.data }
	#[inline]
	pub fn data_mut(&mut self) -> &mut Vec<u8> { &mut self.data }
	#[inline]
	pub fn content(&self) -> &[u8] { &self.data[self.dir.header_len()..] }
	#[inline]
	pub fn content_mut(&mut self) -> &mut [u8] {
		let off = self.dir.header_len();
		&mut self.data[off..]
	}
	#[inline]
	pub fn direction(&self) -> Direction { self.dir }
	#[inline]
	pub fn header(&self) -> InHeader { InHeader(self.header_bytes(), self.dir) }
	#[inline]
	pub fn header_bytes(&self) -> &[u8] { &self.data[..self.dir.header_len()] }

	/// The header without the mac and the content, for in-place encryption.
	#[inline]
	pub fn split_meta_mut(&mut self) -> (&[u8], &mut [u8]) {
		let (header, content) = self.data.split_at_mut(self.dir.header_len());
		(&header[8..], content)
	}

	#[inline]
	pub fn mac(&mut self) -> &mut [u8; 8] { array_mut_ref!(self.data, 0, 8) }
	#[inline]
	pub fn packet_id(&mut self, packet_id: u16) {
		self.data[8..10].copy_from_slice(&packet_id.to_be_bytes());
	}
	/// Client ids only exist in client to server packets, this does nothing
	/// for other packets.
	#[inline]
	pub fn client_id(&mut self, client_id: u16) {
		if self.dir == Direction::C2S {
			self.data[10..12].copy_from_slice(&client_id.to_be_bytes());
		}
	}
	#[inline]
	pub fn flags(&mut self, flags: Flags) {
		let off = self.header().get_off();
		self.data[off] = (self.data[off] & 0xf) | flags.bits();
	}
	#[inline]
	pub fn packet_type(&mut self, packet_type: PacketType) {
		let off = self.header().get_off();
		self.data[off] = (self.data[off] & 0xf0) | packet_type as u8;
	}
}

impl fmt::Debug for OutPacket {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "Packet {{ header: {{ ")?;
		fmt_header(f, &self.header())?;
		write!(f, " }}, content: {} }}", HexSlice(self.content()))
	}
}

pub struct OutCommand;
impl OutCommand {
	/// Write a command packet with a single parameter group.
	///
	/// # Examples
	/// ```
	/// use tsbot_packets::packets::{Direction, OutCommand, PacketType};
	///
	/// let packet = OutCommand::new(Direction::C2S, PacketType::Command, "clientupdate", vec![
	/// 	("client_nickname", "Bot 1".into()),
	/// ]);
	/// assert_eq!(packet.content(), b"clientupdate client_nickname=Bot\\s1");
	/// ```
	pub fn new<'a, I: IntoIterator<Item = (&'a str, CommandArg<'a>)>>(
		dir: Direction, p_type: PacketType, name: &str, params: I,
	) -> OutPacket {
		Self::from_raw(dir, p_type, &commands::build(name, params))
	}

	/// A command packet with an already serialized command.
	pub fn from_raw(dir: Direction, p_type: PacketType, command: &str) -> OutPacket {
		let mut res = OutPacket::new_with_dir(dir, Flags::NEWPROTOCOL, p_type);
		res.data_mut().extend_from_slice(command.as_bytes());
		res
	}
}

fn init_packet(dir: Direction) -> OutPacket {
	let mut res = OutPacket::new_with_dir(dir, Flags::empty(), PacketType::Init);
	res.mac().copy_from_slice(INIT_MAC);
	res.packet_id(INIT_PACKET_ID);
	res
}

pub struct OutC2SInit0;
impl OutC2SInit0 {
	pub fn new(version: u32, timestamp: u32, random0: [u8; 4]) -> OutPacket {
		let mut res = init_packet(Direction::C2S);
		let content = res.data_mut();
		content.extend_from_slice(&version.to_be_bytes());
		content.push(0);
		content.extend_from_slice(&timestamp.to_be_bytes());
		content.extend_from_slice(&random0);
		// Reserved
		content.extend_from_slice(&[0u8; 8]);
		res
	}
}

pub struct OutC2SInit2;
impl OutC2SInit2 {
	pub fn new(version: u32, random1: &[u8; 16], random0_r: [u8; 4]) -> OutPacket {
		let mut res = init_packet(Direction::C2S);
		let content = res.data_mut();
		content.extend_from_slice(&version.to_be_bytes());
		content.push(2);
		content.extend_from_slice(random1);
		content.extend_from_slice(&random0_r);
		res
	}
}

pub struct OutC2SInit4;
impl OutC2SInit4 {
	/// `command` has to be a `clientinitiv` command.
	#[allow(clippy::too_many_arguments)]
	pub fn new(
		version: u32, x: &[u8; 64], n: &[u8; 64], level: u32, random2: &[u8; 100], y: &[u8; 64],
		command: &str,
	) -> OutPacket {
		let mut res = init_packet(Direction::C2S);
		let content = res.data_mut();
		content.extend_from_slice(&version.to_be_bytes());
		content.push(4);
		content.extend_from_slice(x);
		content.extend_from_slice(n);
		content.extend_from_slice(&level.to_be_bytes());
		content.extend_from_slice(random2);
		content.extend_from_slice(y);
		content.extend_from_slice(command.as_bytes());
		res
	}
}

pub struct OutS2CInit1;
impl OutS2CInit1 {
	pub fn new(random1: &[u8; 16], random0_r: [u8; 4]) -> OutPacket {
		let mut res = init_packet(Direction::S2C);
		let content = res.data_mut();
		content.push(1);
		content.extend_from_slice(random1);
		content.extend_from_slice(&random0_r);
		res
	}
}

pub struct OutS2CInit3;
impl OutS2CInit3 {
	pub fn new(x: &[u8; 64], n: &[u8; 64], level: u32, random2: &[u8; 100]) -> OutPacket {
		let mut res = init_packet(Direction::S2C);
		let content = res.data_mut();
		content.push(3);
		content.extend_from_slice(x);
		content.extend_from_slice(n);
		content.extend_from_slice(&level.to_be_bytes());
		content.extend_from_slice(random2);
		res
	}
}

pub struct OutAck;
impl OutAck {
	/// `for_type` is the packet type which gets acknowledged, so e.g. `Command`.
	pub fn new(dir: Direction, for_type: PacketType, packet_id: u16) -> Result<OutPacket> {
		let p_type = for_type.ack_type().ok_or(Error::WrongPacketType(for_type))?;
		let mut res = OutPacket::new_with_dir(dir, Flags::empty(), p_type);
		res.data_mut().extend_from_slice(&packet_id.to_be_bytes());
		Ok(res)
	}
}

/// A ping carries no content.
pub struct OutPing;
impl OutPing {
	pub fn new(dir: Direction) -> OutPacket {
		OutPacket::new_with_dir(dir, Flags::UNENCRYPTED, PacketType::Ping)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn into_in(p: OutPacket) -> InPacket {
		let dir = p.direction();
		InPacket::try_new(p.into_vec(), dir).unwrap()
	}

	#[test]
	fn c2s_header() {
		let mut p = OutPacket::new(
			[1, 2, 3, 4, 5, 6, 7, 8],
			0x1234,
			Some(0xabcd),
			Flags::NEWPROTOCOL | Flags::FRAGMENTED,
			PacketType::CommandLow,
		);
		p.data_mut().extend_from_slice(b"abc");
		assert_eq!(p.header_bytes(), &[1, 2, 3, 4, 5, 6, 7, 8, 0x12, 0x34, 0xab, 0xcd, 0x33]);
		assert_eq!(p.header().get_meta(), &[0x12, 0x34, 0xab, 0xcd, 0x33]);

		let p = into_in(p);
		let header = p.header();
		assert_eq!(header.packet_id(), 0x1234);
		assert_eq!(header.client_id(), Some(0xabcd));
		assert_eq!(header.packet_type(), PacketType::CommandLow);
		assert_eq!(header.flags(), Flags::NEWPROTOCOL | Flags::FRAGMENTED);
		assert_eq!(p.content(), b"abc");
	}

	#[test]
	fn s2c_header() {
		let p = OutPacket::new([0; 8], 7, None, Flags::UNENCRYPTED, PacketType::Ping);
		assert_eq!(p.header_bytes().len(), crate::S2C_HEADER_LEN);
		assert_eq!(p.header().get_meta(), &[0, 7, 0x84]);
		let p = into_in(p);
		assert_eq!(p.header().client_id(), None);
		assert!(p.content().is_empty());
	}

	#[test]
	fn reject_invalid_packets() {
		assert!(matches!(
			InPacket::try_new(vec![0; 10], Direction::S2C),
			Err(Error::PacketTooShort(10))
		));
		let mut data = vec![0; crate::C2S_HEADER_LEN];
		data[12] = 0x09;
		assert!(matches!(
			InPacket::try_new(data, Direction::C2S),
			Err(Error::UnknownPacketType(9))
		));
	}

	#[test]
	fn ack() {
		let p = into_in(OutAck::new(Direction::S2C, PacketType::Command, 513).unwrap());
		assert_eq!(p.header().packet_type(), PacketType::Ack);
		assert_eq!(p.ack_packet(), Some(513));
		assert!(OutAck::new(Direction::S2C, PacketType::Voice, 1).is_err());

		let p = into_in(OutAck::new(Direction::C2S, PacketType::Ping, 3).unwrap());
		assert_eq!(p.header().packet_type(), PacketType::Pong);
		assert_eq!(p.ack_packet(), Some(3));
	}

	#[test]
	fn init_packets() {
		let p = into_in(OutC2SInit0::new(1, 2, [3; 4]));
		assert_eq!(p.header().packet_id(), INIT_PACKET_ID);
		assert_eq!(p.header().mac(), INIT_MAC);
		assert!(matches!(p.c2sinit().unwrap(), C2SInitData::Init0 {
			version: 1,
			timestamp: 2,
			random0: [3, 3, 3, 3]
		}));
		assert!(matches!(p.s2cinit(), Err(Error::WrongDirection)));

		let p = into_in(OutS2CInit1::new(&[1; 16], [2; 4]));
		assert!(matches!(p.s2cinit().unwrap(), S2CInitData::Init1 { random0_r: [2, 2, 2, 2], .. }));

		let p = into_in(OutS2CInit3::new(&[1; 64], &[2; 64], 1000, &[3; 100]));
		match p.s2cinit().unwrap() {
			S2CInitData::Init3 { x, n, level, random2 } => {
				assert_eq!(x, [1; 64]);
				assert_eq!(n, [2; 64]);
				assert_eq!(level, 1000);
				assert_eq!(random2, [3; 100]);
			}
			d => panic!("Unexpected init packet {:?}", d),
		}

		let command = commands::build("clientinitiv", vec![
			("alpha", CommandArg::from("QUJDREVGR0hJSg==")),
			("omega", "MEsD".into()),
			("ot", 1u8.into()),
			("ip", CommandArg::Flag),
		]);
		let p = into_in(OutC2SInit4::new(7, &[1; 64], &[2; 64], 5, &[3; 100], &[4; 64], &command));
		match p.c2sinit().unwrap() {
			C2SInitData::Init4 { version, level, y, command, .. } => {
				assert_eq!(version, 7);
				assert_eq!(level, 5);
				assert_eq!(y, [4; 64]);
				assert_eq!(command.name, "clientinitiv");
				assert_eq!(command.get("alpha"), Some("QUJDREVGR0hJSg=="));
				assert!(command.has("ip"));
			}
			d => panic!("Unexpected init packet {:?}", d),
		}
	}

	#[test]
	fn wrong_init_mac() {
		let mut p = OutS2CInit1::new(&[1; 16], [2; 4]);
		p.mac().copy_from_slice(&[0; 8]);
		assert!(matches!(into_in(p).s2cinit(), Err(Error::WrongInitMac(_))));
	}

	#[test]
	fn command_packet() {
		let p = OutCommand::new(Direction::S2C, PacketType::Command, "initserver", vec![(
			"aclid",
			CommandArg::from(2u16),
		)]);
		let p = into_in(p);
		assert!(p.header().flags().contains(Flags::NEWPROTOCOL));
		let cmd = InCommand::with_content(&p, p.content()).unwrap();
		assert_eq!(cmd.name(), "initserver");
		assert_eq!(cmd.data().get_parse::<u16>("aclid").unwrap(), 2);
		assert!(cmd.newprotocol());
	}

	#[test]
	fn set_content() {
		let mut p = into_in(OutCommand::from_raw(Direction::C2S, PacketType::Command, "abc"));
		p.set_content(b"longer content");
		assert_eq!(p.content(), b"longer content");
		assert_eq!(p.clone().take_content(), b"longer content");
		let (header, content) = p.split_mut();
		assert_eq!(header.packet_type(), PacketType::Command);
		content[0] = b'L';
		assert_eq!(&p.content()[..4], b"Long");
	}
}

//! Encoding and decoding of udp packets.
//!
//! Incoming packets get decrypted, ordered, defragmented and decompressed,
//! outgoing packets get split into fragments and encrypted.
use std::task::Context;

use tracing::{debug, warn};
use tsbot_packets::packets::*;

use crate::algorithms as algs;
use crate::connection::{Connection, Event, StreamItem};
use crate::resend::Resender;
use crate::{quicklz, Error, Result, MAX_PACKET_LENGTH, MAX_QUEUE_LEN};

/// Number of packet types.
const TYPE_COUNT: usize = 9;

/// An encoded packet that is ready to be sent.
#[derive(Clone, Debug)]
pub struct OutUdpPacket {
	generation_id: u32,
	/// The packet id, for init packets this is the init step.
	packet_id: u16,
	data: OutPacket,
}

impl OutUdpPacket {
	pub fn new(generation_id: u32, packet_id: u16, data: OutPacket) -> Self {
		Self { generation_id, packet_id, data }
	}

	#[inline]
	pub fn generation_id(&self) -> u32 { self.generation_id }
	#[inline]
	pub fn packet_id(&self) -> u16 { self.packet_id }
	#[inline]
	pub fn packet_type(&self) -> PacketType { self.data.header().packet_type() }
	#[inline]
	pub fn data(&self) -> &OutPacket { &self.data }
}

#[derive(Debug, Default)]
pub struct PacketCodec {
	/// The next packet id that should be sent.
	///
	/// This list is indexed by the [`PacketType`], [`PacketType::Init`] is an
	/// invalid index.
	pub outgoing_p_ids: [(u32, u16); TYPE_COUNT],
	/// Used for incoming out-of-order packets.
	///
	/// Only used for `Command` and `CommandLow` packets.
	pub receive_queue: [Vec<InPacket>; 2],
	/// Used for incoming fragmented packets.
	///
	/// Contains the first packet and the accumulated content.
	/// Only used for `Command` and `CommandLow` packets.
	pub fragmented_queue: [Option<(InPacket, Vec<u8>)>; 2],
	/// The next packet id that is expected.
	///
	/// Works like the `outgoing_p_ids`.
	pub incoming_p_ids: [(u32, u16); TYPE_COUNT],
	/// Packets with a wrong mac since the last correct packet.
	pub mac_failures: u32,
}

impl PacketCodec {
	/// Handle a packet for a specific connection.
	///
	/// This part does the defragmentation, decryption and decompression.
	/// Decoded items are appended to the stream items of the connection.
	pub fn handle_udp_packet(con: &mut Connection, cx: &mut Context, mut packet: InPacket) -> Result<()> {
		let header = packet.header();
		let p_type = header.packet_type();
		let flags = header.flags();
		let dir = packet.direction();
		let id = header.packet_id();
		let (in_recv_win, gen_id, cur_next, limit) = con.in_receive_window(p_type, id);

		if con.params.is_some() && p_type == PacketType::Init {
			return Err(Error::UnexpectedInitPacket);
		}

		// Ignore range for acks
		if !(p_type.is_ack() || in_recv_win) {
			// Send an ack for the case when it was lost
			if p_type.is_command() {
				con.send_unacked_packet(cx, OutAck::new(dir.reverse(), p_type, id)?)?;
			}
			return Err(Error::NotInReceiveWindow { id, next: cur_next, limit, p_type });
		}

		if !flags.contains(Flags::UNENCRYPTED) {
			// The first acks of a client are fake encrypted
			let fake = (p_type == PacketType::Ack && id <= 1 && con.is_client) || con.params.is_none();
			let decrypted = fake && algs::decrypt_fake(&mut packet).is_ok();
			if !decrypted {
				let res = if let Some(params) = &con.params {
					algs::decrypt(&mut packet, gen_id, &params.shared_iv)
				} else {
					Err(Error::WrongMac { p_type, generation: gen_id, p_id: id })
				};
				if let Err(e) = res {
					if p_type == PacketType::Ack && id == 1 && con.is_client {
						// Ignore error, this is the ack packet for the
						// clientinit, we take the initserver as ack anyway.
						return Ok(());
					}
					con.codec.mac_failures += 1;
					warn!(error = %e, failures = con.codec.mac_failures, "Dropping packet");
					return Err(e);
				}
			}
			con.codec.mac_failures = 0;
		} else if algs::must_encrypt(p_type) {
			// Check if it is ok for the packet to be unencrypted
			return Err(Error::UnallowedUnencryptedPacket);
		}

		con.send_event(&Event::ReceivePacket(&packet));
		con.resender.received_packet();

		match p_type {
			PacketType::Command | PacketType::CommandLow => {
				if con.is_client {
					// The init4 packet is acknowledged by the first command
					Resender::ack_packet(con, PacketType::Init, 4);
				}
				con.send_unacked_packet(cx, OutAck::new(dir.reverse(), p_type, id)?)?;
				Self::handle_command_packet(con, packet)?;
			}
			_ => {
				if p_type == PacketType::Ping {
					con.send_unacked_packet(cx, OutAck::new(dir.reverse(), p_type, id)?)?;
				}
				// Update packet ids
				if p_type != PacketType::Init {
					let (next_id, next_gen) = id.overflowing_add(1);
					con.codec.incoming_p_ids[p_type as usize] =
						(if next_gen { gen_id.wrapping_add(1) } else { gen_id }, next_id);
				}

				if let Some(ack_id) = packet.ack_packet() {
					// Remove command packet from send queue if the fitting ack is received.
					if let Some(acked) = p_type.acked_type().filter(|t| t.is_command()) {
						Resender::ack_packet(con, acked, ack_id);
					}
				} else if p_type == PacketType::Init {
					Self::handle_init_packet(con, &packet)?;
				}
			}
		}
		Ok(())
	}

	/// An init packet acknowledges the previous step of the other side.
	fn handle_init_packet(con: &mut Connection, packet: &InPacket) -> Result<()> {
		let item = if con.is_client {
			let data = packet.s2cinit()?;
			let step = packet.content()[0];
			if let Some(prev) = step.checked_sub(1) {
				Resender::ack_packet(con, PacketType::Init, prev.into());
			}
			StreamItem::S2CInit(data)
		} else {
			let data = packet.c2sinit()?;
			let step = packet.content()[4];
			if let Some(prev) = step.checked_sub(1) {
				Resender::ack_packet(con, PacketType::Init, prev.into());
			}
			StreamItem::C2SInit(data)
		};
		con.stream_items.push_back(item);
		Ok(())
	}

	/// Handle `Command` and `CommandLow` packets.
	///
	/// They have to be handled in the right order.
	fn handle_command_packet(con: &mut Connection, mut packet: InPacket) -> Result<()> {
		let header = packet.header();
		let p_type = header.packet_type();
		let mut id = header.packet_id();
		let type_i = p_type as usize;
		let cmd_i = if p_type == PacketType::Command { 0 } else { 1 };
		let cur_next = con.codec.incoming_p_ids[type_i].1;
		if cur_next != id {
			// Out of order
			warn!(got = id, expected = cur_next, "Out of order command packet");
			let (limit, next_gen) = cur_next.overflowing_add(MAX_QUEUE_LEN);
			let r_queue = &mut con.codec.receive_queue[cmd_i];
			if (!next_gen && id >= cur_next && id < limit)
				|| (next_gen && (id >= cur_next || id < limit))
			{
				// Drop duplicates
				if r_queue.iter().all(|p| p.header().packet_id() != id) {
					r_queue.push(packet);
				}
				return Ok(());
			}
			return Err(Error::MaxLengthExceeded("command queue".into()));
		}

		// In order
		loop {
			// Update next packet id
			let in_ids = &mut con.codec.incoming_p_ids[type_i];
			let (next_id, next_gen) = id.overflowing_add(1);
			if next_gen {
				// Next packet generation
				in_ids.0 = in_ids.0.wrapping_add(1);
			}
			in_ids.1 = next_id;

			match Self::defragment(con, cmd_i, packet) {
				Ok(Some(cmd)) => con.stream_items.push_back(StreamItem::Command(cmd)),
				Ok(None) => {}
				Err(e) => {
					warn!(error = %e, "Failed to decode command");
					con.stream_items.push_back(StreamItem::Error(e));
				}
			}

			// Check if there are following packets in the receive queue.
			id = next_id;
			let r_queue = &mut con.codec.receive_queue[cmd_i];
			if let Some(pos) = r_queue.iter().position(|p| p.header().packet_id() == id) {
				packet = r_queue.remove(pos);
			} else {
				break;
			}
		}
		Ok(())
	}

	/// Collect fragments and decode the command once it is complete.
	fn defragment(con: &mut Connection, cmd_i: usize, packet: InPacket) -> Result<Option<InCommand>> {
		let max_len = con.ctx.max_fragments_length();
		let max_decompressed = con.ctx.max_decompressed_size();
		let frag_queue = &mut con.codec.fragmented_queue[cmd_i];
		let flags = packet.header().flags();

		if flags.contains(Flags::FRAGMENTED) {
			if let Some((first, mut content)) = frag_queue.take() {
				// Last fragmented packet
				content.extend_from_slice(packet.content());
				if content.len() > max_len {
					return Err(Error::MaxLengthExceeded("fragment queue".into()));
				}
				// The flags of the first packet are valid for the command
				let content = if first.header().flags().contains(Flags::COMPRESSED) {
					quicklz::decompress(&content, max_decompressed)?
				} else {
					content
				};
				Ok(Some(InCommand::with_content(&first, &content)?))
			} else {
				// Enqueue
				let content = packet.content().to_vec();
				*frag_queue = Some((packet, content));
				Ok(None)
			}
		} else if let Some((_, content)) = frag_queue {
			// The packet is fragmented
			if content.len() + packet.content().len() > max_len {
				*frag_queue = None;
				return Err(Error::MaxLengthExceeded("fragment queue".into()));
			}
			content.extend_from_slice(packet.content());
			Ok(None)
		} else if flags.contains(Flags::COMPRESSED) {
			let content = quicklz::decompress(packet.content(), max_decompressed)?;
			debug!(len = content.len(), "Decompressed command");
			Ok(Some(InCommand::with_content(&packet, &content)?))
		} else {
			Ok(Some(InCommand::with_content(&packet, packet.content())?))
		}
	}

	/// Assign packet ids, split and encrypt a packet.
	pub fn encode_packet(con: &mut Connection, mut packet: OutPacket) -> Result<Vec<OutUdpPacket>> {
		let p_type = packet.header().packet_type();
		let type_i = p_type as usize;
		let is_client = con.is_client;

		let (gen, p_id) =
			if p_type == PacketType::Init { (0, 0) } else { con.codec.outgoing_p_ids[type_i] };
		// We fake encrypt the first command packet of the server (id 0) and
		// the first command packet of the client (id 1, the clientek).
		let mut fake_encrypt = p_type == PacketType::Command
			&& gen == 0 && ((!is_client && p_id == 0)
			|| (is_client && p_id == 1 && packet.content().starts_with(b"clientek")));
		// Also fake encrypt the first ack of the client, which is the response
		// for the initivexpand2 packet.
		fake_encrypt |= is_client && p_type == PacketType::Ack && gen == 0 && p_id == 0;

		// Get values from parameters
		let should_encrypt;
		let c_id;
		if let Some(params) = con.params.as_ref() {
			should_encrypt = algs::should_encrypt(p_type, params.voice_encryption);
			c_id = params.c_id;
		} else {
			should_encrypt = algs::should_encrypt(p_type, false);
			if should_encrypt {
				fake_encrypt = true;
			}
			c_id = 0;
		}

		// Client id for clients
		if is_client {
			packet.client_id(c_id);
		}

		if !should_encrypt && !fake_encrypt {
			packet.flags(packet.header().flags() | Flags::UNENCRYPTED);
			if let Some(params) = con.params.as_ref() {
				packet.mac().copy_from_slice(&params.shared_mac);
			}
		}

		let mut init_step = None;
		let packets = if p_type.is_command() {
			split(packet)
		} else {
			if p_type.is_voice() && packet.content().len() >= 2 {
				// Set the inner packet id for voice packets
				packet.content_mut()[..2].copy_from_slice(&p_id.to_be_bytes());
			}
			if p_type == PacketType::Init {
				// Identify init packets by their number
				let step_off = if packet.direction() == Direction::S2C { 0 } else { 4 };
				let step = *packet
					.content()
					.get(step_off)
					.ok_or(tsbot_packets::Error::PacketContentTooShort(packet.content().len()))?;
				init_step = Some(u16::from(step));
			}
			vec![packet]
		};

		let mut res = Vec::with_capacity(packets.len());
		for mut packet in packets {
			let (gen, p_id) =
				if p_type == PacketType::Init { (0, 0) } else { con.codec.outgoing_p_ids[type_i] };
			let packet_id = if let Some(step) = init_step {
				step
			} else {
				packet.packet_id(p_id);
				p_id
			};

			// Encrypt if necessary
			if fake_encrypt {
				algs::encrypt_fake(&mut packet);
			} else if should_encrypt {
				if let Some(params) = con.params.as_ref() {
					algs::encrypt(&mut packet, gen, &params.shared_iv);
				}
			}

			// Increment outgoing_p_ids
			if p_type != PacketType::Init {
				let next_id = p_id.wrapping_add(1);
				let next_gen = if next_id == 0 { gen.wrapping_add(1) } else { gen };
				con.codec.outgoing_p_ids[type_i] = (next_gen, next_id);
			}
			res.push(OutUdpPacket::new(gen, packet_id, packet));
		}
		Ok(res)
	}
}

/// Split a command into packets that fit into the maximum packet size.
///
/// The first and the last fragment get the fragmented flag.
fn split(packet: OutPacket) -> Vec<OutPacket> {
	let header_len = packet.direction().header_len();
	let max_size = MAX_PACKET_LENGTH - header_len;
	let content = packet.content();
	if content.len() <= max_size {
		return vec![packet];
	}

	let count = (content.len() + max_size - 1) / max_size;
	let mut res = Vec::with_capacity(count);
	for (i, chunk) in content.chunks(max_size).enumerate() {
		let mut data = packet.header_bytes().to_vec();
		data.extend_from_slice(chunk);
		let mut p = OutPacket::new_from_data(packet.direction(), data);
		let flags = p.header().flags();
		let mut flags = if i == 0 { flags } else { flags - Flags::COMPRESSED };
		if i == 0 || i == count - 1 {
			flags |= Flags::FRAGMENTED;
		}
		p.flags(flags);
		res.push(p);
	}
	res
}

use std::cmp::{Ord, Ordering};
use std::collections::{BTreeSet, BinaryHeap};
use std::hash::{Hash, Hasher};
use std::mem;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::prelude::*;
use serde::{Deserialize, Serialize};
use tokio::time::{Duration, Instant, Sleep};
use tracing::{info, warn};
use tsbot_packets::packets::*;

use crate::connection::{Connection, StreamItem};
use crate::packet_codec::OutUdpPacket;
use crate::{Error, Result, UDP_SINK_CAPACITY};

// Use cubic for congestion control: https://en.wikipedia.org/wiki/CUBIC_TCP
// But scaling with number of sent packets instead of time because we might not
// send packets that often.

/// Congestion windows gets down to 0.3*w_max for BETA=0.7
const BETA: f32 = 0.7;
/// Increase over w_max after roughly 5 packets (C=0.2 needs seven packets).
const C: f32 = 0.5;
/// The retransmission timeout is never longer than this.
const MAX_SEND_RTO: Duration = Duration::from_secs(2);
/// Send a ping after this time while connected.
const PING_INTERVAL: Duration = Duration::from_secs(1);

/// Events to inform a resender of the current state of a connection.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum ResenderState {
	/// The connection is starting, reduce the timeout time.
	Connecting,
	/// The handshake is completed, this is the normal operation mode.
	Connected,
	/// The connection is tearing down, reduce the timeout time.
	Disconnecting,
	/// The connection is gone, we only send ack packets.
	Disconnected,
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct PacketId {
	pub packet_type: PacketType,
	pub generation_id: u32,
	pub packet_id: u16,
}

/// A record of a packet that can be resent.
#[derive(Debug)]
struct SendRecord {
	/// When this packet was originally sent.
	pub sent: Instant,
	/// The last time when the packet was sent.
	pub last: Instant,
	/// How often the packet was already resent.
	pub tries: usize,
	pub id: PacketId,
	pub packet: OutUdpPacket,
}

/// Resend command and init packets until the other side acknowledges them.
#[derive(Debug)]
pub struct Resender {
	/// Send queue ordered by when a packet has to be sent.
	///
	/// The maximum in this queue is the next packet that should be resent.
	to_send: BinaryHeap<SendRecord>,
	/// Send queue ordered by packet id.
	///
	/// There is one queue per packet type: `Init`, `Command` and `CommandLow`.
	to_send_ordered: [BTreeSet<PacketId>; 3],
	config: ResendConfig,
	state: ResenderState,

	// Congestion control
	/// The maximum send window before the last reduction.
	w_max: u16,
	/// The amount of packets that were sent since the last loss.
	packet_count: u16,

	/// When the last packet was received.
	///
	/// This is used to decide when the connection timed out.
	last_receive: Instant,
	/// When the last packet was added to the send queue.
	///
	/// This is used to handle timeouts when disconnecting.
	last_send: Instant,
	/// When the last ping was sent.
	last_ping: Instant,

	/// The future to wake us up when the next packet should be resent.
	timeout: Pin<Box<Sleep>>,
	/// The timer used for sending ping packets.
	ping_timeout: Pin<Box<Sleep>>,
	/// The timer used for disconnecting the connection.
	state_timeout: Pin<Box<Sleep>>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct ResendConfig {
	// Close the connection after no packet is received for this duration.
	#[serde(with = "millis")]
	pub connecting_timeout: Duration,
	#[serde(with = "millis")]
	pub normal_timeout: Duration,
	#[serde(with = "millis")]
	pub disconnect_timeout: Duration,

	/// Start value for the Smoothed Round Trip Time.
	#[serde(with = "millis")]
	pub srtt: Duration,
	/// Start value for the deviation of the srtt.
	#[serde(with = "millis")]
	pub srtt_dev: Duration,
}

/// Durations are configured in milliseconds.
mod millis {
	use serde::{Deserialize, Deserializer, Serializer};
	use tokio::time::Duration;

	pub fn serialize<S: Serializer>(d: &Duration, ser: S) -> Result<S::Ok, S::Error> {
		ser.serialize_u64(d.as_millis() as u64)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Duration, D::Error> {
		Ok(Duration::from_millis(u64::deserialize(de)?))
	}
}

impl PacketId {
	pub fn new(packet_type: PacketType, generation_id: u32, packet_id: u16) -> Self {
		Self { packet_type, generation_id, packet_id }
	}

	/// The id of the packet that was sent before this one.
	pub fn prev(&self) -> Self {
		let (packet_id, wrapped) = self.packet_id.overflowing_sub(1);
		let generation_id =
			if wrapped { self.generation_id.wrapping_sub(1) } else { self.generation_id };
		Self { packet_type: self.packet_type, generation_id, packet_id }
	}
}

impl Ord for PacketId {
	fn cmp(&self, other: &Self) -> Ordering {
		self.generation_id
			.cmp(&other.generation_id)
			.then_with(|| self.packet_id.cmp(&other.packet_id))
	}
}

impl PartialOrd for PacketId {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl From<&OutUdpPacket> for PacketId {
	fn from(packet: &OutUdpPacket) -> Self {
		Self {
			packet_type: packet.packet_type(),
			generation_id: packet.generation_id(),
			packet_id: packet.packet_id(),
		}
	}
}

impl Ord for SendRecord {
	fn cmp(&self, other: &Self) -> Ordering {
		// If the packet was not already sent, it is more important
		if self.tries == 0 {
			if other.tries == 0 { self.id.cmp(&other.id).reverse() } else { Ordering::Greater }
		} else if other.tries == 0 {
			Ordering::Less
		} else {
			// The smallest time is the most important time
			self.last.cmp(&other.last).reverse().then_with(||
				// Else, the lower packet id is more important
				self.id.cmp(&other.id).reverse())
		}
	}
}

impl PartialOrd for SendRecord {
	fn partial_cmp(&self, other: &Self) -> Option<Ordering> { Some(self.cmp(other)) }
}

impl PartialEq for SendRecord {
	fn eq(&self, other: &Self) -> bool { self.id.eq(&other.id) }
}
impl Eq for SendRecord {}

impl Hash for SendRecord {
	fn hash<H: Hasher>(&self, state: &mut H) { self.id.hash(state); }
}

impl Resender {
	pub fn new(config: ResendConfig) -> Self {
		let now = Instant::now();
		Self {
			to_send: Default::default(),
			to_send_ordered: Default::default(),
			config,
			state: ResenderState::Connecting,

			w_max: UDP_SINK_CAPACITY as u16,
			packet_count: 0,

			last_receive: now,
			last_send: now,
			last_ping: now,
			timeout: Box::pin(tokio::time::sleep(PING_INTERVAL)),
			ping_timeout: Box::pin(tokio::time::sleep(PING_INTERVAL)),
			state_timeout: Box::pin(tokio::time::sleep(PING_INTERVAL)),
		}
	}

	fn packet_type_to_index(t: PacketType) -> Option<usize> {
		match t {
			PacketType::Init => Some(0),
			PacketType::Command => Some(1),
			PacketType::CommandLow => Some(2),
			_ => None,
		}
	}

	/// If packets of this type are stored until they are acknowledged.
	pub fn is_resent(t: PacketType) -> bool { Self::packet_type_to_index(t).is_some() }

	pub fn ack_packet(con: &mut Connection, p_type: PacketType, p_id: u16) {
		let matches =
			|rec: &SendRecord| rec.id.packet_type == p_type && rec.id.packet_id == p_id;
		let rec = if let Some(rec) = con.resender.to_send.peek() {
			if matches(rec) {
				// Optimized to remove the first element
				con.resender.to_send.pop()
			} else {
				// Convert to vector to remove the element
				let mut v = mem::take(&mut con.resender.to_send).into_vec();
				let rec = v.iter().position(matches).map(|i| v.remove(i));
				con.resender.to_send = v.into();
				rec
			}
		} else {
			// Do nothing if the heap is empty
			None
		};

		if let Some(rec) = rec {
			// Update srtt if the packet was not resent
			if rec.tries == 1 {
				let now = Instant::now();
				con.resender.update_srtt(now - rec.sent);
			}

			let Some(i) = Self::packet_type_to_index(p_type) else { return };
			// Remove from ordered queue
			let queue = &mut con.resender.to_send_ordered[i];
			let is_first = queue.iter().next() == Some(&rec.id);
			queue.remove(&rec.id);
			if is_first && p_type != PacketType::Init {
				// Everything before the next unacknowledged packet is acknowledged
				let acked = queue.iter().next().map(PacketId::prev).unwrap_or_else(|| {
					let (gen, id) = con.codec.outgoing_p_ids[p_type as usize];
					PacketId::new(p_type, gen, id).prev()
				});
				con.stream_items.push_back(StreamItem::AckPacket(acked));
			}
		}
	}

	pub fn received_packet(&mut self) { self.last_receive = Instant::now(); }

	fn get_timeout(&self) -> Duration {
		match self.state {
			ResenderState::Connecting => self.config.connecting_timeout,
			ResenderState::Disconnecting | ResenderState::Disconnected => {
				self.config.disconnect_timeout
			}
			ResenderState::Connected => self.config.normal_timeout,
		}
	}

	/// Inform the resender of state changes of the connection.
	pub fn set_state(&mut self, state: ResenderState) {
		info!(from = ?self.state, to = ?state, "Resender: Changed state");
		self.state = state;

		self.last_send = Instant::now();
		self.last_receive = self.last_send;
		let deadline = self.last_send + self.get_timeout();
		self.state_timeout.as_mut().reset(deadline);
	}

	pub fn get_state(&self) -> ResenderState { self.state }

	/// If the send queue is empty.
	pub fn is_empty(&self) -> bool { self.to_send.is_empty() }

	/// The amount of packets that can be in-flight currently.
	///
	/// The CUBIC congestion control window.
	fn get_window(&self) -> u16 {
		let res = C
			* (self.packet_count as f32 - (self.w_max as f32 * BETA / C).powf(1.0 / 3.0)).powf(3.0)
			+ self.w_max as f32;
		let max = u16::MAX / 2;
		if res > max as f32 {
			max
		} else if res <= 1.0 {
			1
		} else {
			res as u16
		}
	}

	/// Add another duration to the stored smoothed rtt.
	fn update_srtt(&mut self, rtt: Duration) {
		let diff =
			if rtt > self.config.srtt { rtt - self.config.srtt } else { self.config.srtt - rtt };
		self.config.srtt_dev = self.config.srtt_dev * 3 / 4 + diff / 4;
		self.config.srtt = self.config.srtt * 7 / 8 + rtt / 8;
	}

	/// Enqueue a packet, it is sent on the next poll.
	pub fn send_packet(con: &mut Connection, packet: OutUdpPacket) {
		let now = Instant::now();
		con.resender.last_send = now;
		let rec = SendRecord { sent: now, last: now, tries: 0, id: (&packet).into(), packet };

		if let Some(i) = Self::packet_type_to_index(rec.id.packet_type) {
			con.resender.to_send_ordered[i].insert(rec.id);
			con.resender.to_send.push(rec);
		}
	}

	/// Returns an error if the timeout is exceeded and the connection is
	/// considered dead or another unrecoverable error occurs.
	pub fn poll_resend(con: &mut Connection, cx: &mut Context) -> Result<()> {
		let now = Instant::now();
		let timeout = con.resender.get_timeout();

		let mut packet_loss = false;
		let mut done = 0;
		loop {
			done += 1;
			// Handle congestion window when the resender is not borrowed
			if packet_loss {
				con.resender.w_max = con.resender.get_window();
				con.resender.packet_count = 0;
			} else {
				con.resender.packet_count = con.resender.packet_count.saturating_add(1);
			}
			let window = con.resender.get_window();

			// Don't send more packets than our window size
			if done > window {
				return Ok(());
			}

			// Retransmission timeout
			let rto = std::cmp::min(
				con.resender.config.srtt + con.resender.config.srtt_dev * 4,
				MAX_SEND_RTO,
			);
			let last_threshold = now.checked_sub(rto).unwrap_or(now);

			let Some(rec) = con.resender.to_send.peek() else { return Ok(()) };
			// Check if we should resend this packet or not
			if rec.tries != 0 && rec.last > last_threshold {
				// Schedule next send
				let deadline = rec.last + rto;
				con.resender.timeout.as_mut().reset(deadline);
				if let Poll::Ready(()) = con.resender.timeout.as_mut().poll(cx) {
					cx.waker().wake_by_ref();
				}
				return Ok(());
			}

			if now - rec.sent > timeout {
				warn!(id = ?rec.id, tries = rec.tries, "Packet was not acknowledged in time");
				con.resender.to_send.clear();
				return Err(Error::Timeout(con.resender.state_name()));
			}

			// Try to send this packet
			match Connection::static_poll_send_udp_packet(
				&*con.udp_socket,
				con.address,
				&con.event_listeners,
				cx,
				&rec.packet,
			) {
				Poll::Pending => break,
				Poll::Ready(Err(e)) => return Err(e),
				Poll::Ready(Ok(())) => {
					let mut rec = match con.resender.to_send.pop() {
						Some(r) => r,
						None => break,
					};
					// Successfully started sending the packet, now schedule the
					// next send time for this packet and enqueue it.
					// Double srtt on packet loss
					if rec.tries != 0 {
						con.resender.config.srtt =
							std::cmp::min(con.resender.config.srtt * 2, timeout);
						packet_loss = true;
					} else {
						packet_loss = false;
					}

					// Update record
					rec.last = now;
					rec.tries += 1;

					if rec.tries != 1 {
						let to = if con.is_client { "S" } else { "C" };
						warn!(
							id = ?rec.id,
							tries = rec.tries,
							to,
							srtt = ?con.resender.config.srtt,
							srtt_dev = ?con.resender.config.srtt_dev,
							rto = ?rto,
							send_window = window,
							"Resend"
						);
					}
					con.resender.to_send.push(rec);
				}
			}
		}

		Ok(())
	}

	fn state_name(&self) -> &'static str {
		match self.state {
			ResenderState::Connecting => "connecting",
			ResenderState::Connected => "connected",
			ResenderState::Disconnecting => "disconnecting",
			ResenderState::Disconnected => "disconnected",
		}
	}

	/// Send pings and check the timeouts of the current state.
	///
	/// Returns an error if the timeout is exceeded and the connection is
	/// considered dead.
	pub fn poll_ping(con: &mut Connection, cx: &mut Context) -> Result<()> {
		let now = Instant::now();
		let timeout = con.resender.get_timeout();

		let deadline = match con.resender.state {
			ResenderState::Disconnected => return Ok(()),
			ResenderState::Disconnecting => con.resender.last_send + timeout,
			ResenderState::Connecting | ResenderState::Connected => {
				con.resender.last_receive + timeout
			}
		};
		if now >= deadline {
			return Err(Error::Timeout(con.resender.state_name()));
		}
		con.resender.state_timeout.as_mut().reset(deadline);
		if let Poll::Ready(()) = con.resender.state_timeout.as_mut().poll(cx) {
			return Err(Error::Timeout(con.resender.state_name()));
		}

		if con.resender.state == ResenderState::Connected {
			if now >= con.resender.last_ping + PING_INTERVAL {
				con.resender.last_ping = now;
				let dir = if con.is_client { Direction::C2S } else { Direction::S2C };
				con.send_unacked_packet(cx, OutPing::new(dir))?;
			}
			let next = con.resender.last_ping + PING_INTERVAL;
			con.resender.ping_timeout.as_mut().reset(next);
			if let Poll::Ready(()) = con.resender.ping_timeout.as_mut().poll(cx) {
				cx.waker().wake_by_ref();
			}
		}
		Ok(())
	}
}

impl Default for ResendConfig {
	fn default() -> Self {
		Self {
			connecting_timeout: Duration::from_secs(5),
			normal_timeout: Duration::from_secs(30),
			disconnect_timeout: Duration::from_secs(5),

			srtt: Duration::from_millis(500),
			srtt_dev: Duration::from_millis(0),
		}
	}
}

use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::mem;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use futures::prelude::*;
use tokio::io::ReadBuf;
use tokio::net::UdpSocket;
use tracing::{info_span, warn, Span};
use tsbot_packets::packets::*;
use tsbot_types::crypto::EccKeyPubP256;

use crate::algorithms::SharedIv;
use crate::context::CryptoContext;
use crate::packet_codec::{OutUdpPacket, PacketCodec};
use crate::resend::{PacketId, ResendConfig, Resender, ResenderState};
use crate::{Error, Result, MAX_MAC_FAILURES, MAX_UDP_PACKET_LENGTH, UDP_SINK_CAPACITY};

/// A udp socket, or something that behaves like one.
pub trait Socket: fmt::Debug + Send {
	fn poll_recv_from(&self, cx: &mut Context, buf: &mut ReadBuf) -> Poll<io::Result<SocketAddr>>;
	fn poll_send_to(&self, cx: &mut Context, buf: &[u8], target: SocketAddr) -> Poll<io::Result<usize>>;
	fn local_addr(&self) -> io::Result<SocketAddr>;
}

impl Socket for UdpSocket {
	fn poll_recv_from(&self, cx: &mut Context, buf: &mut ReadBuf) -> Poll<io::Result<SocketAddr>> {
		UdpSocket::poll_recv_from(self, cx, buf)
	}

	fn poll_send_to(&self, cx: &mut Context, buf: &[u8], target: SocketAddr) -> Poll<io::Result<usize>> {
		UdpSocket::poll_send_to(self, cx, buf, target)
	}

	fn local_addr(&self) -> io::Result<SocketAddr> { UdpSocket::local_addr(self) }
}

/// Data that has to be stored for a connection when it is connected.
#[derive(Debug)]
pub struct ConnectedParams {
	/// The client id of this connection.
	pub c_id: u16,
	/// If voice packets should be encrypted, off unless the server asks for it.
	pub voice_encryption: bool,

	/// The public key of the other side.
	pub public_key: EccKeyPubP256,
	/// The iv used to encrypt and decrypt packets.
	pub shared_iv: SharedIv,
	/// The mac used for unencrypted packets.
	pub shared_mac: [u8; 8],
}

/// An event that originates from a connection.
///
/// Event listeners get them before packets are sent and after packets are
/// received.
#[derive(Debug)]
pub enum Event<'a> {
	ReceiveUdpPacket(&'a InUdpPacket<'a>),
	ReceivePacket(&'a InPacket),
	SendUdpPacket(&'a OutUdpPacket),
	SendPacket(&'a OutPacket),
}

/// An item that originates from a connection.
///
/// The disconnected event is signaled by returning `None` from the stream.
#[derive(Debug)]
pub enum StreamItem {
	Command(InCommand),
	C2SInit(C2SInitData),
	S2CInit(S2CInitData),
	/// All packets up to this id were acknowledged.
	AckPacket(PacketId),
	/// A recoverable error, the packet was dropped.
	Error(Error),
}

pub type EventListener = Box<dyn for<'a> Fn(&'a Event<'a>) + Send>;

/// Represents a currently alive connection.
pub struct Connection {
	pub is_client: bool,
	pub span: Span,
	/// The parameters of this connection, if it is already established.
	pub params: Option<ConnectedParams>,
	/// The adress of the other side, where packets are coming from and going
	/// to.
	pub address: SocketAddr,
	pub ctx: CryptoContext,
	/// Consecutive packets with a wrong mac, before the connection fails.
	pub max_mac_failures: u32,

	pub resender: Resender,
	pub codec: PacketCodec,
	pub udp_socket: Box<dyn Socket>,
	udp_buffer: Vec<u8>,

	/// Used in the stream implementation.
	next_poll: u8,

	/// A buffer of packets that should be returned from the stream.
	///
	/// If a new udp packet is received and we already received the following
	/// ids, we can get multiple packets back at once. As we can only return one
	/// from the stream, the rest is stored here.
	pub(crate) stream_items: VecDeque<StreamItem>,

	/// The internal queue of packets that are sent without waiting for an ack.
	///
	/// If it gets too long, polling from the udp socket is blocked.
	acks_to_send: VecDeque<OutUdpPacket>,

	pub event_listeners: Vec<EventListener>,
}

impl ConnectedParams {
	/// Fills the parameters for a connection with their default state.
	pub fn new(public_key: EccKeyPubP256, shared_iv: SharedIv, shared_mac: [u8; 8]) -> Self {
		Self { c_id: 0, voice_encryption: false, public_key, shared_iv, shared_mac }
	}
}

impl fmt::Debug for Connection {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		f.debug_struct("Connection")
			.field("is_client", &self.is_client)
			.field("address", &self.address)
			.field("state", &self.resender.get_state())
			.field("params", &self.params)
			.finish()
	}
}

impl Connection {
	pub fn new(
		is_client: bool, address: SocketAddr, udp_socket: Box<dyn Socket>, ctx: CryptoContext,
		resend_config: ResendConfig,
	) -> Self {
		let span = info_span!("connection", addr = %address, client = is_client);
		let mut res = Self {
			is_client,
			span,
			params: None,
			address,
			ctx,
			max_mac_failures: MAX_MAC_FAILURES,
			resender: Resender::new(resend_config),
			codec: Default::default(),
			udp_socket,
			udp_buffer: Default::default(),
			next_poll: Default::default(),

			stream_items: Default::default(),
			acks_to_send: Default::default(),
			event_listeners: Default::default(),
		};
		let cmd_i = PacketType::Command as usize;
		if is_client {
			// The first command is sent as part of the C2SInit::Init4 packet
			// so it does not get registered automatically.
			res.codec.outgoing_p_ids[cmd_i] = (0, 1);
		} else {
			res.codec.incoming_p_ids[cmd_i] = (0, 1);
		}
		res
	}

	/// Check if a given id is in the receive window.
	///
	/// Returns
	/// 1. If the packet id is inside the receive window
	/// 1. The generation of the packet
	/// 1. The minimum accepted packet id
	/// 1. The maximum accepted packet id
	pub(crate) fn in_receive_window(&self, p_type: PacketType, p_id: u16) -> (bool, u32, u16, u16) {
		if p_type == PacketType::Init {
			return (true, 0, 0, 0);
		}
		let type_i = p_type as usize;
		// Receive window is the next half of ids
		let (gen, cur_next) = self.codec.incoming_p_ids[type_i];
		let (limit, next_gen) = cur_next.overflowing_add(u16::MAX / 2);
		let in_recv_win = (!next_gen && p_id >= cur_next && p_id < limit)
			|| (next_gen && (p_id >= cur_next || p_id < limit));
		let gen_id = if in_recv_win {
			if next_gen && p_id < limit { gen.wrapping_add(1) } else { gen }
		} else if p_id < cur_next {
			gen
		} else {
			gen.wrapping_sub(1)
		};

		(in_recv_win, gen_id, cur_next, limit)
	}

	pub fn send_event(&self, event: &Event) {
		for l in &self.event_listeners {
			l(event)
		}
	}

	fn flush_acks(&mut self, cx: &mut Context) -> Result<()> {
		while let Some(packet) = self.acks_to_send.front() {
			match self.poll_send_udp_packet(cx, packet) {
				Poll::Ready(Ok(())) => {}
				Poll::Ready(Err(e)) => return Err(e),
				Poll::Pending => break,
			}
			self.acks_to_send.pop_front();
		}
		Ok(())
	}

	fn poll_incoming_udp_packet(&mut self, cx: &mut Context) -> Poll<Result<StreamItem>> {
		if let Err(e) = self.flush_acks(cx) {
			return Poll::Ready(Err(e));
		}
		if self.acks_to_send.len() >= UDP_SINK_CAPACITY {
			return Poll::Pending;
		}

		// Poll stream_items
		if let Some(item) = self.stream_items.pop_front() {
			return Poll::Ready(Ok(item));
		}

		loop {
			// Poll udp_socket
			if self.udp_buffer.len() != MAX_UDP_PACKET_LENGTH {
				self.udp_buffer.resize(MAX_UDP_PACKET_LENGTH, 0);
			}

			let mut buf = ReadBuf::new(&mut self.udp_buffer);
			match self.udp_socket.poll_recv_from(cx, &mut buf) {
				Poll::Ready(Ok(addr)) => {
					let size = buf.filled().len();
					let mut udp_buffer = mem::take(&mut self.udp_buffer);
					udp_buffer.truncate(size);
					match self.handle_udp_packet(cx, udp_buffer, addr) {
						Ok(()) => {
							if let Some(item) = self.stream_items.pop_front() {
								return Poll::Ready(Ok(item));
							}
						}
						Err(e) if e.is_auth_failure() => {
							if self.resender.get_state() == ResenderState::Connecting {
								// Nothing is retried with the same keys
								return Poll::Ready(Err(e));
							}
							if self.codec.mac_failures > self.max_mac_failures {
								return Poll::Ready(Err(Error::TooManyMacFailures));
							}
							return Poll::Ready(Ok(StreamItem::Error(e)));
						}
						Err(e) => {
							warn!(parent: &self.span, error = %e, "Failed to handle udp packet");
							return Poll::Ready(Ok(StreamItem::Error(e)));
						}
					}
				}
				// Udp socket closed
				Poll::Ready(Err(e)) => return Poll::Ready(Err(e.into())),
				Poll::Pending => return Poll::Pending,
			}
		}
	}

	fn handle_udp_packet(&mut self, cx: &mut Context, udp_buffer: Vec<u8>, addr: SocketAddr) -> Result<()> {
		if addr != self.address {
			return Err(Error::WrongAddress);
		}

		let dir = if self.is_client { Direction::S2C } else { Direction::C2S };
		let packet = InPacket::try_new(udp_buffer, dir)?;
		self.send_event(&Event::ReceiveUdpPacket(&InUdpPacket::new(&packet)));

		PacketCodec::handle_udp_packet(self, cx, packet)
	}

	/// Try to send a packet that does not need to be acknowledged, like an ack
	/// or a ping.
	///
	/// If it does not work, add it to the ack queue.
	pub(crate) fn send_unacked_packet(&mut self, cx: &mut Context, packet: OutPacket) -> Result<()> {
		self.send_event(&Event::SendPacket(&packet));
		for packet in PacketCodec::encode_packet(self, packet)? {
			match self.poll_send_udp_packet(cx, &packet) {
				Poll::Ready(r) => r?,
				Poll::Pending => self.acks_to_send.push_back(packet),
			}
		}
		Ok(())
	}

	/// Queue a packet for sending.
	///
	/// The packet is sent when the connection gets polled the next time.
	/// Returns the id of the last udp packet, if the packet is resent until it
	/// gets acknowledged.
	pub fn send_packet(&mut self, packet: OutPacket) -> Result<Option<PacketId>> {
		let _span = self.span.clone().entered();
		self.send_event(&Event::SendPacket(&packet));
		let mut last = None;
		for packet in PacketCodec::encode_packet(self, packet)? {
			if Resender::is_resent(packet.packet_type()) {
				last = Some(PacketId::from(&packet));
				Resender::send_packet(self, packet);
			} else {
				self.acks_to_send.push_back(packet);
			}
		}
		Ok(last)
	}

	pub fn poll_send_udp_packet(&self, cx: &mut Context, packet: &OutUdpPacket) -> Poll<Result<()>> {
		Self::static_poll_send_udp_packet(&*self.udp_socket, self.address, &self.event_listeners, cx, packet)
	}

	pub fn static_poll_send_udp_packet(
		udp_socket: &dyn Socket, address: SocketAddr, event_listeners: &[EventListener],
		cx: &mut Context, packet: &OutUdpPacket,
	) -> Poll<Result<()>> {
		let data = packet.data().data();
		match udp_socket.poll_send_to(cx, data, address)? {
			Poll::Pending => Poll::Pending,
			Poll::Ready(size) => {
				let event = Event::SendUdpPacket(packet);
				for l in event_listeners {
					l(&event)
				}

				if size != data.len() {
					Poll::Ready(Err(io::Error::new(
						io::ErrorKind::WriteZero,
						"Failed to send whole udp packet",
					)
					.into()))
				} else {
					Poll::Ready(Ok(()))
				}
			}
		}
	}

	/// If every queued packet was acknowledged.
	pub fn is_send_queue_empty(&self) -> bool { self.resender.is_empty() }
}

/// Pull for events.
///
/// `Ok(StreamItem::Error)` is recoverable, `Err()` is not.
///
/// Polling does a few things in round robin fashion:
/// 1. Check for new udp packets
/// 2. Use the resender to resend packets if necessary
/// 3. Use the resender to send ping packets if necessary
impl Stream for Connection {
	type Item = Result<StreamItem>;
	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
		const COUNT: u8 = 3;
		let span = self.span.clone();
		let _span = span.enter();
		if self.resender.get_state() == ResenderState::Disconnected {
			// Send all ack packets and return `None` afterwards
			if let Err(e) = self.flush_acks(cx) {
				return Poll::Ready(Some(Err(e)));
			}
			if self.acks_to_send.is_empty() {
				return Poll::Ready(None);
			}
			return Poll::Pending;
		}

		for _ in 0..COUNT {
			self.next_poll = (self.next_poll + 1) % COUNT;
			match self.next_poll {
				0 => {
					// Check for new udp packets
					match self.poll_incoming_udp_packet(cx) {
						Poll::Pending => {}
						Poll::Ready(r) => return Poll::Ready(Some(r)),
					}
				}
				1 => {
					// Use the resender to resend packes
					if let Err(e) = Resender::poll_resend(&mut self, cx) {
						return Poll::Ready(Some(Err(e)));
					}
				}
				2 => {
					// Use the resender to send pings
					if let Err(e) = Resender::poll_ping(&mut self, cx) {
						return Poll::Ready(Some(Err(e)));
					}
				}
				_ => unreachable!(),
			}
		}

		Poll::Pending
	}
}

#[cfg(test)]
mod tests {
	use std::net::{IpAddr, Ipv4Addr};

	use tsbot_types::crypto::EccKeyPrivP256;

	use super::*;

	#[derive(Debug)]
	struct NoSocket;

	impl Socket for NoSocket {
		fn poll_recv_from(&self, _: &mut Context, _: &mut ReadBuf) -> Poll<io::Result<SocketAddr>> {
			Poll::Pending
		}

		fn poll_send_to(&self, _: &mut Context, buf: &[u8], _: SocketAddr) -> Poll<io::Result<usize>> {
			Poll::Ready(Ok(buf.len()))
		}

		fn local_addr(&self) -> io::Result<SocketAddr> {
			Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
		}
	}

	fn connection() -> Connection {
		let addr = "127.0.0.1:9987".parse().unwrap();
		Connection::new(true, addr, Box::new(NoSocket), CryptoContext::default(), Default::default())
	}

	#[tokio::test]
	async fn receive_window() {
		let mut con = connection();
		let t = PacketType::Command;
		con.codec.incoming_p_ids[t as usize] = (3, 10);
		assert_eq!(con.in_receive_window(t, 10), (true, 3, 10, 10 + u16::MAX / 2));
		assert!(!con.in_receive_window(t, 9).0);
		assert_eq!(con.in_receive_window(t, 9).1, 3);

		// The window wraps into the next generation
		con.codec.incoming_p_ids[t as usize] = (3, 65_000);
		let (in_win, gen, _, _) = con.in_receive_window(t, 5);
		assert!(in_win);
		assert_eq!(gen, 4);
		let (in_win, gen, _, _) = con.in_receive_window(t, 65_100);
		assert!(in_win);
		assert_eq!(gen, 3);
	}

	#[tokio::test]
	async fn client_ids_start_after_init4() {
		let mut con = connection();
		let p = OutCommand::from_raw(Direction::C2S, PacketType::Command, "clientek ek=a proof=b");
		let id = con.send_packet(p).unwrap().unwrap();
		assert_eq!(id, PacketId::new(PacketType::Command, 0, 1));
		assert_eq!(con.codec.outgoing_p_ids[PacketType::Command as usize], (0, 2));
	}

	#[tokio::test]
	async fn voice_is_sent_with_shared_mac() {
		let mut con = connection();
		let key = EccKeyPrivP256::create().to_pub();
		con.params = Some(ConnectedParams::new(key, SharedIv::Protocol31([0; 64]), [0x42; 8]));

		let mut p = OutPacket::new_with_dir(Direction::C2S, Flags::empty(), PacketType::Voice);
		p.data_mut().extend_from_slice(&[9, 9, 4, 1, 2, 3]);
		let packets = PacketCodec::encode_packet(&mut con, p).unwrap();
		assert_eq!(packets.len(), 1);
		let data = packets[0].data();
		assert!(data.header().flags().contains(Flags::UNENCRYPTED));
		assert_eq!(data.header().mac(), &[0x42; 8]);
		// The first two bytes are the voice packet id
		assert_eq!(data.content(), &[0, 0, 4, 1, 2, 3]);

		// Encrypted if the server requests it
		con.params.as_mut().unwrap().voice_encryption = true;
		let mut p = OutPacket::new_with_dir(Direction::C2S, Flags::empty(), PacketType::Voice);
		p.data_mut().extend_from_slice(&[9, 9, 4, 1, 2, 3]);
		let packets = PacketCodec::encode_packet(&mut con, p).unwrap();
		assert!(!packets[0].data().header().flags().contains(Flags::UNENCRYPTED));
	}
}

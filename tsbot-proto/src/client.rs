use std::net::SocketAddr;
use std::ops::{Deref, DerefMut};
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use base64::prelude::*;
use futures::prelude::*;
use futures::stream;
use rand::Rng;
use time::OffsetDateTime;
use tokio::net::UdpSocket;
use tracing::{debug, info, warn, Instrument};
use tsbot_packets::commands::{self, Command, CommandArg};
use tsbot_packets::packets::*;
use tsbot_types::crypto::{encode_password, EccKeyPrivEd25519, EccKeyPubP256};

use crate::algorithms::{self as algs, SharedIv};
use crate::config::ConnectOptions;
use crate::connection::{ConnectedParams, Connection, Socket, StreamItem};
use crate::context::CryptoContext;
use crate::identity::Identity;
use crate::license::Licenses;
use crate::resend::{PacketId, ResenderState};
use crate::utils::is_global_ip;
use crate::{Error, Result};

/// The server could not validate the identity, its level is too low.
pub const IDENTITY_LEVEL_TOO_LOW: u32 = 1796;

/// Something that happened on the server.
#[derive(Debug)]
pub enum ClientEvent {
	Command(Command),
	TextMessage {
		/// The client id of the sender.
		from: u16,
		target_mode: u8,
		message: String,
	},
	/// The server removed us, the event stream ends after this.
	Disconnected,
	/// A packet was dropped, the connection is still alive.
	Error(Error),
}

/// A connection to a server, from the client side.
pub struct Client {
	con: Connection,
	options: ConnectOptions,
	identity: Identity,
}

impl Client {
	/// Uses the identity of the options or creates a new one.
	pub fn new(options: ConnectOptions, udp_socket: Box<dyn Socket>, ctx: CryptoContext) -> Self {
		let identity = options.identity.clone().unwrap_or_else(Identity::create);
		let mut con =
			Connection::new(true, options.address, udp_socket, ctx, options.resend.clone());
		con.max_mac_failures = options.max_mac_failures;
		crate::log::add_logger(&mut con, options.log);
		Self { con, options, identity }
	}

	/// Bind a new udp socket and use it to talk to the server.
	pub async fn bind(options: ConnectOptions) -> Result<Self> {
		let local: SocketAddr = if options.address.is_ipv4() {
			(std::net::Ipv4Addr::UNSPECIFIED, 0).into()
		} else {
			(std::net::Ipv6Addr::UNSPECIFIED, 0).into()
		};
		let socket = UdpSocket::bind(local).await?;
		Ok(Self::new(options, Box::new(socket), CryptoContext::default()))
	}

	#[inline]
	pub fn identity(&self) -> &Identity { &self.identity }
	#[inline]
	pub fn options(&self) -> &ConnectOptions { &self.options }

	/// Our client id, once the handshake finished.
	pub fn client_id(&self) -> Option<u16> {
		if self.con.resender.get_state() == ResenderState::Connecting {
			None
		} else {
			self.con.params.as_ref().map(|p| p.c_id)
		}
	}

	async fn get_init(&mut self, init_step: u8) -> Result<S2CInitData> {
		self.filter_items(|_, i| {
			Ok(match i {
				StreamItem::S2CInit(data) => {
					let step = match &data {
						S2CInitData::Init1 { .. } => 1,
						S2CInitData::Init3 { .. } => 3,
					};
					if step == init_step {
						Some(data)
					} else {
						// Resent packet
						debug!(step, "Got wrong init packet");
						None
					}
				}
				StreamItem::C2SInit(_) => {
					warn!("Got init packet from the wrong direction");
					None
				}
				StreamItem::Error(e) => {
					warn!(error = %e, "Got connection error");
					None
				}
				StreamItem::AckPacket(_) => None,
				StreamItem::Command(cmd) => {
					warn!(got = cmd.name(), "Unexpected packet, wanted S2CInit");
					None
				}
			})
		})
		.await
	}

	async fn get_command(&mut self) -> Result<InCommand> {
		self.filter_items(|_, i| {
			Ok(match i {
				StreamItem::Command(cmd) => Some(cmd),
				StreamItem::Error(e) => {
					warn!(error = %e, "Got connection error");
					None
				}
				_ => None,
			})
		})
		.await
	}

	/// Drop all packets until the given packet is acknowledged.
	pub async fn wait_for_ack(&mut self, id: PacketId) -> Result<()> {
		self.filter_items(|_, i| {
			Ok(match i {
				StreamItem::AckPacket(ack) => {
					if ack.packet_type == id.packet_type && id <= ack {
						Some(())
					} else {
						None
					}
				}
				StreamItem::Error(e) => {
					warn!(error = %e, "Got connection error");
					None
				}
				_ => None,
			})
		})
		.await
	}

	/// Filter the incoming items.
	pub async fn filter_items<T, F: Fn(&mut Client, StreamItem) -> Result<Option<T>>>(
		&mut self, filter: F,
	) -> Result<T> {
		loop {
			match self.next().await {
				None => return Err(Error::ConnectionClosed),
				Some(r) => {
					if let Some(r) = filter(self, r?)? {
						return Ok(r);
					}
				}
			}
		}
	}

	/// Queue a packet.
	///
	/// Sending `clientdisconnect` switches the connection into the
	/// disconnecting state.
	pub fn send_packet(&mut self, packet: OutPacket) -> Result<Option<PacketId>> {
		if self.con.resender.get_state() == ResenderState::Disconnected {
			return Err(Error::ConnectionClosed);
		}
		if packet.header().packet_type() == PacketType::Command
			&& packet.content().starts_with(b"clientdisconnect")
		{
			self.con.resender.set_state(ResenderState::Disconnecting);
		}
		self.con.send_packet(packet)
	}

	/// Send a command, returns the id of its last packet.
	pub fn send_command<'a, I: IntoIterator<Item = (&'a str, CommandArg<'a>)>>(
		&mut self, name: &str, params: I,
	) -> Result<PacketId> {
		let packet = OutCommand::new(Direction::C2S, PacketType::Command, name, params);
		// Commands are always resent, so there is an id
		self.send_packet(packet)?.ok_or(Error::ConnectionClosed)
	}

	/// Do the handshake and join the server.
	pub async fn connect(&mut self) -> Result<()> {
		let span = self.con.span.clone();
		self.connect_inner().instrument(span).await
	}

	async fn connect_inner(&mut self) -> Result<()> {
		let timestamp = OffsetDateTime::now_utc().unix_timestamp() as u32;
		let version = build_timestamp(&self.options.version.version).unwrap_or(timestamp);
		let random0 = rand::thread_rng().gen::<[u8; 4]>();
		info!("Connecting");
		self.send_packet(OutC2SInit0::new(version, timestamp, random0))?;

		let (random1, random0_r) = match self.get_init(1).await? {
			S2CInitData::Init1 { random1, random0_r } => (random1, random0_r),
			_ => return Err(Error::Handshake("Unexpected init packet, needs Init1".into())),
		};
		// Most of the time, random0_r is the reversed random0, but sometimes it
		// isn't so do not check it.
		self.send_packet(OutC2SInit2::new(version, &random1, random0_r))?;

		let (x, n, level, random2) = match self.get_init(3).await? {
			S2CInitData::Init3 { x, n, level, random2 } => (x, n, level, random2),
			_ => return Err(Error::Handshake("Unexpected init packet, needs Init3".into())),
		};
		let start = Instant::now();
		let y = algs::solve_puzzle(&x, &n, level)?;
		info!(level, time = ?start.elapsed(), "Solved RSA puzzle");

		let alpha = rand::thread_rng().gen::<[u8; 10]>();
		let alpha_s = BASE64_STANDARD.encode(alpha);
		// omega is the public key in the tomcrypt format
		let omega = self.identity.omega()?;
		let ip = self.con.address.ip();
		let ip = if is_global_ip(&ip) { CommandArg::from(ip.to_string()) } else { CommandArg::Flag };
		let command = commands::build("clientinitiv", [
			("alpha", alpha_s.as_str().into()),
			("omega", omega.as_str().into()),
			("ot", 1u8.into()),
			("ip", ip),
		]);
		self.send_packet(OutC2SInit4::new(version, &x, &n, level, &random2, &y, &command))?;

		let cmd = self.get_command().await?;
		if cmd.name() != "initivexpand2" {
			return Err(Error::Handshake(format!("Expected initivexpand2, got {}", cmd.name()).into()));
		}
		let cmd = cmd.into_command();
		if cmd.get("ot") != Some("1") {
			return Err(Error::Handshake("initivexpand2 needs ot=1".into()));
		}
		required(&cmd, "time")?;
		let server_key = EccKeyPubP256::from_ts(required(&cmd, "omega")?)?;
		let l = BASE64_STANDARD.decode(required(&cmd, "l")?)?;
		let proof = BASE64_STANDARD.decode(required(&cmd, "proof")?)?;
		// The license is signed by the server
		server_key.verify(&l, &proof)?;

		let beta_vec = BASE64_STANDARD.decode(required(&cmd, "beta")?)?;
		let beta: [u8; 54] = beta_vec.as_slice().try_into().map_err(|_| {
			Error::Handshake(format!("Incorrect beta length {} != 54", beta_vec.len()).into())
		})?;

		let licenses = Licenses::parse_ignore_expired(&l)?;
		// Ephemeral key of the server
		let server_ek = licenses.derive_public_key(&self.con.ctx)?;
		let ek = EccKeyPrivEd25519::create();
		let (iv, mac) = algs::compute_iv_mac31(&alpha, &beta, &ek, &server_ek);

		// Proof: ECDSA signature of ek || beta
		let ek_pub = ek.to_pub();
		let mut all = Vec::with_capacity(32 + 54);
		all.extend_from_slice(&ek_pub.to_bytes());
		all.extend_from_slice(&beta);
		let proof = BASE64_STANDARD.encode(self.identity.key().sign(&all));
		let ek_s = ek_pub.to_base64();
		// Still fake encrypted, the parameters are set afterwards
		let clientek_id =
			self.send_command("clientek", [("ek", ek_s.as_str().into()), ("proof", proof.into())])?;
		self.con.params = Some(ConnectedParams::new(server_key, SharedIv::Protocol31(iv), mac));
		self.wait_for_ack(clientek_id).await?;
		info!("Exchanged keys");

		let command = self.clientinit();
		self.send_packet(OutCommand::from_raw(Direction::C2S, PacketType::Command, &command))?;

		loop {
			let cmd = self.get_command().await?;
			match cmd.name() {
				// The client id is set while handling the command
				"initserver" => break,
				"error" => {
					let cmd = cmd.data();
					let id: u32 = cmd.get_parse("id")?;
					if id == 0 {
						continue;
					}
					if id == IDENTITY_LEVEL_TOO_LOW {
						if let Ok(needed) = cmd.get_parse("extra_msg") {
							return Err(Error::IdentityLevelTooLow { needed });
						}
					}
					let msg = cmd.get("msg").unwrap_or_default().to_string();
					return Err(Error::Server { id, msg });
				}
				name => debug!(name, "Ignoring command before initserver"),
			}
		}
		info!(c_id = ?self.client_id(), "Connected");
		Ok(())
	}

	fn clientinit(&self) -> String {
		let options = &self.options;
		let password = options.password.as_deref().map(|p| encode_password(p.as_bytes()));
		let channel_password =
			options.channel_password.as_deref().map(|p| encode_password(p.as_bytes()));
		commands::build("clientinit", [
			("client_nickname", options.name.as_str().into()),
			("client_version", options.version.version.as_str().into()),
			("client_platform", options.version.platform.as_str().into()),
			("client_input_hardware", true.into()),
			("client_output_hardware", true.into()),
			("client_default_channel", options.channel.as_deref().unwrap_or_default().into()),
			("client_default_channel_password", channel_password.as_deref().unwrap_or_default().into()),
			("client_server_password", password.as_deref().unwrap_or_default().into()),
			("client_meta_data", "".into()),
			("client_version_sign", options.version.signature.as_str().into()),
			("client_key_offset", self.identity.key_offset().into()),
			("client_nickname_phonetic", "".into()),
			("client_default_token", "".into()),
			("hwid", options.hwid.as_str().into()),
		])
	}

	/// The commands and messages from the server.
	///
	/// The stream ends when the connection is closed.
	pub fn events(&mut self) -> impl Stream<Item = Result<ClientEvent>> + '_ {
		stream::poll_fn(move |cx| loop {
			let item = match Pin::new(&mut *self).poll_next(cx) {
				Poll::Ready(Some(Ok(item))) => item,
				Poll::Ready(Some(Err(e))) => return Poll::Ready(Some(Err(e))),
				Poll::Ready(None) => return Poll::Ready(None),
				Poll::Pending => return Poll::Pending,
			};
			let event = match item {
				StreamItem::Command(cmd) => {
					if cmd.name() == "notifyclientleftview"
						&& self.con.resender.get_state() == ResenderState::Disconnected
					{
						ClientEvent::Disconnected
					} else {
						ClientEvent::from_command(cmd.into_command())
					}
				}
				StreamItem::Error(e) => ClientEvent::Error(e),
				_ => continue,
			};
			return Poll::Ready(Some(Ok(event)));
		})
	}

	/// Leave the server.
	///
	/// Finishes when the server acknowledged the disconnect or when the
	/// disconnect timeout elapsed.
	pub async fn disconnect(&mut self, reason: &str) -> Result<()> {
		info!(reason, "Disconnecting");
		// Reason: Disconnect
		let id = self
			.send_command("clientdisconnect", [("reasonid", 8u8.into()), ("reasonmsg", reason.into())])?;
		loop {
			match self.next().await {
				None => return Ok(()),
				Some(Err(Error::Timeout(_))) => {
					warn!("Disconnect was not acknowledged");
					self.con.resender.set_state(ResenderState::Disconnected);
					return Ok(());
				}
				Some(Err(e)) => return Err(e),
				Some(Ok(StreamItem::AckPacket(ack))) => {
					if ack.packet_type == id.packet_type && id <= ack {
						self.con.resender.set_state(ResenderState::Disconnected);
					}
				}
				Some(Ok(StreamItem::Error(e))) => warn!(error = %e, "Got connection error"),
				Some(Ok(_)) => {}
			}
		}
	}

	fn handle_command(&mut self, command: &InCommand) -> Result<()> {
		let cmd = command.data();
		match command.name() {
			"initserver" => {
				let c_id = cmd.get_parse("aclid")?;
				let params = self.con.params.as_mut().ok_or_else(|| {
					Error::Handshake("Got initserver, but we have not yet a full connection".into())
				})?;
				params.c_id = c_id;
				// Notify the resender that we are connected
				self.con.resender.set_state(ResenderState::Connected);
			}
			"notifyclientleftview" => {
				if let Some(params) = &self.con.params {
					let c_id = params.c_id;
					if cmd.iter().any(|p| p.get_parse::<u16>("clid").ok() == Some(c_id)) {
						info!("Server removed us");
						self.con.resender.set_state(ResenderState::Disconnected);
					}
				}
			}
			"notifyplugincmd" if cmd.get("name") == Some("getversion") => {
				if let Some(sender) = cmd.get("invokerid") {
					let version = format!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
					self.send_command("plugincmd", [
						("name", "getversion".into()),
						("data", version.as_str().into()),
						// PluginTargetMode::Client
						("targetmode", 2u8.into()),
						("target", sender.into()),
					])?;
				}
			}
			_ => {}
		}
		Ok(())
	}
}

/// The build timestamp of a version like `3.1.8 [Build: 1516614607]`.
fn build_timestamp(version: &str) -> Option<u32> {
	const PREFIX: &str = "[Build: ";
	let start = version.find(PREFIX)? + PREFIX.len();
	let len = version[start..].find(']')?;
	version[start..start + len].parse().ok()
}

fn required<'a>(cmd: &'a Command, key: &str) -> Result<&'a str> {
	Ok(cmd.get(key).ok_or_else(|| tsbot_packets::Error::MissingParameter(key.into()))?)
}

impl ClientEvent {
	fn from_command(cmd: Command) -> Self {
		if cmd.name == "notifytextmessage" {
			if let (Ok(from), Ok(target_mode), Some(message)) =
				(cmd.get_parse("invokerid"), cmd.get_parse("targetmode"), cmd.get("msg"))
			{
				let message = message.to_string();
				return ClientEvent::TextMessage { from, target_mode, message };
			}
		}
		ClientEvent::Command(cmd)
	}
}

impl Deref for Client {
	type Target = Connection;
	fn deref(&self) -> &Self::Target { &self.con }
}

impl DerefMut for Client {
	fn deref_mut(&mut self) -> &mut Self::Target { &mut self.con }
}

/// Handles the commands that change the connection state.
impl Stream for Client {
	type Item = Result<StreamItem>;
	fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context) -> Poll<Option<Self::Item>> {
		match Pin::new(&mut self.con).poll_next(cx) {
			Poll::Ready(Some(Ok(StreamItem::Command(command)))) => {
				if let Err(e) = self.handle_command(&command) {
					return Poll::Ready(Some(Err(e)));
				}
				Poll::Ready(Some(Ok(StreamItem::Command(command))))
			}
			r => r,
		}
	}
}

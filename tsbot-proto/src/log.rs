//! Log packets of a connection.
//!
//! The loggers are event listeners, so they see udp packets before they are
//! decrypted and after they are encrypted, and packets after they are
//! decrypted and before they are encrypted.
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};
use tsbot_packets::HexSlice;

use crate::connection::{Connection, Event};

/// Which packets are logged.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct LogFlags {
	/// Log the raw content of udp packets.
	pub udp_packets: bool,
	/// Log decoded packets.
	pub packets: bool,
}

fn prepare(is_client: bool, incoming: bool) -> (&'static str, &'static str) {
	let dir = if incoming { "IN" } else { "OUT" };
	// Who is on the other side
	let to = if is_client { "S" } else { "C" };
	(dir, to)
}

/// Attach event listeners to a connection that log packets.
///
/// Records are emitted inside the span of the connection, so they carry its
/// address.
pub fn add_logger(con: &mut Connection, flags: LogFlags) {
	let is_client = con.is_client;
	let span = con.span.clone();
	if flags.udp_packets {
		let span = span.clone();
		con.event_listeners.push(Box::new(move |event: &Event| {
			let _span = span.enter();
			match event {
				Event::ReceiveUdpPacket(packet) => {
					let (dir, to) = prepare(is_client, true);
					trace!(dir, to, packet = ?packet, "UdpPacket");
				}
				Event::SendUdpPacket(packet) => {
					let (dir, to) = prepare(is_client, false);
					trace!(
						dir,
						to,
						id = packet.packet_id(),
						content = %HexSlice(packet.data().data()),
						"UdpPacket"
					);
				}
				_ => {}
			}
		}));
	}
	if flags.packets {
		con.event_listeners.push(Box::new(move |event: &Event| {
			let _span = span.enter();
			match event {
				Event::ReceivePacket(packet) => {
					let (dir, to) = prepare(is_client, true);
					debug!(dir, to, packet = ?packet, "Packet");
				}
				Event::SendPacket(packet) => {
					let (dir, to) = prepare(is_client, false);
					debug!(dir, to, packet = ?packet, "Packet");
				}
				_ => {}
			}
		}));
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn flags_from_toml() {
		let flags: LogFlags = toml::from_str("packets = true").unwrap();
		assert_eq!(flags, LogFlags { udp_packets: false, packets: true });
	}
}

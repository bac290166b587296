//! Options to connect to a server, loadable from a toml file.
//!
//! ```toml
//! address = "127.0.0.1:9987"
//! name = "Bot"
//! channel = "Lobby"
//!
//! [resend]
//! connecting_timeout = 10000
//! ```
use std::net::SocketAddr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::identity::Identity;
use crate::log::LogFlags;
use crate::resend::ResendConfig;
use crate::{Result, MAX_MAC_FAILURES};

/// The hardware id that is sent to the server.
pub const DEFAULT_HWID: &str = "923f136fb1e22ae6ce95e60255529c00,d13231b1bc33edfecfb9169cc7a63bcc";

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct ConnectOptions {
	pub address: SocketAddr,
	#[serde(default = "default_name")]
	pub name: String,
	#[serde(default = "default_hwid")]
	pub hwid: String,
	/// The server password in plain text.
	#[serde(default)]
	pub password: Option<String>,
	/// The path or id of the channel to join.
	#[serde(default)]
	pub channel: Option<String>,
	#[serde(default)]
	pub channel_password: Option<String>,
	/// Consecutive packets with a wrong mac before the connection is closed.
	#[serde(default = "default_max_mac_failures")]
	pub max_mac_failures: u32,
	#[serde(default)]
	pub version: ClientVersion,
	/// A new identity is created if there is none.
	#[serde(default)]
	pub identity: Option<Identity>,
	#[serde(default)]
	pub log: LogFlags,
	#[serde(default)]
	pub resend: ResendConfig,
}

/// The client version is signed, so the version, the platform and the
/// signature have to match.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ClientVersion {
	pub version: String,
	pub platform: String,
	pub signature: String,
}

fn default_name() -> String { "TeamSpeakUser".into() }
fn default_hwid() -> String { DEFAULT_HWID.into() }
fn default_max_mac_failures() -> u32 { MAX_MAC_FAILURES }

impl Default for ClientVersion {
	fn default() -> Self {
		Self {
			version: "3.1.8 [Build: 1516614607]".into(),
			platform: "Linux".into(),
			signature: "LJ5q+KWT4KwBX7oR/9j9A12hBrq5ds5ony99f9kepNmqFskhT7gfB51bAJNgAMOzXVCeaItNmc10F2wUNktqCw=="
				.into(),
		}
	}
}

impl ConnectOptions {
	/// Options with default values.
	pub fn new(address: SocketAddr) -> Self {
		Self {
			address,
			name: default_name(),
			version: Default::default(),
			hwid: default_hwid(),
			password: None,
			channel: None,
			channel_password: None,
			identity: None,
			log: Default::default(),
			resend: Default::default(),
			max_mac_failures: default_max_mac_failures(),
		}
	}

	pub fn from_toml(s: &str) -> Result<Self> { Ok(toml::from_str(s)?) }

	pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
		Self::from_toml(&std::fs::read_to_string(path)?)
	}

	#[must_use]
	pub fn name<S: Into<String>>(mut self, name: S) -> Self {
		self.name = name.into();
		self
	}

	#[must_use]
	pub fn password<S: Into<String>>(mut self, password: S) -> Self {
		self.password = Some(password.into());
		self
	}

	#[must_use]
	pub fn channel<S: Into<String>>(mut self, channel: S) -> Self {
		self.channel = Some(channel.into());
		self
	}

	#[must_use]
	pub fn identity(mut self, identity: Identity) -> Self {
		self.identity = Some(identity);
		self
	}

	#[must_use]
	pub fn log(mut self, log: LogFlags) -> Self {
		self.log = log;
		self
	}
}

#[cfg(test)]
mod tests {
	use std::time::Duration;

	use super::*;

	#[test]
	fn only_address() {
		let options = ConnectOptions::from_toml(r#"address = "127.0.0.1:9987""#).unwrap();
		assert_eq!(options.name, "TeamSpeakUser");
		assert_eq!(options.version, ClientVersion::default());
		assert_eq!(options.hwid, DEFAULT_HWID);
		assert_eq!(options.max_mac_failures, MAX_MAC_FAILURES);
		assert!(options.identity.is_none());
		assert_eq!(options.resend.normal_timeout, Duration::from_secs(30));
	}

	#[test]
	fn missing_address() {
		assert!(matches!(ConnectOptions::from_toml("name = \"Bot\""), Err(crate::Error::Toml(_))));
	}

	#[test]
	fn full() {
		let options = ConnectOptions::from_toml(
			r#"
			address = "[::1]:9988"
			name = "Bot"
			password = "secret"
			channel = "Lobby/Sub"
			max_mac_failures = 2

			[version]
			version = "3.5.0"
			platform = "Windows"
			signature = "sig"

			[log]
			udp_packets = true

			[resend]
			connecting_timeout = 1000
			"#,
		)
		.unwrap();
		assert_eq!(options.address, "[::1]:9988".parse().unwrap());
		assert_eq!(options.password.as_deref(), Some("secret"));
		assert_eq!(options.channel.as_deref(), Some("Lobby/Sub"));
		assert_eq!(options.version.platform, "Windows");
		assert!(options.log.udp_packets);
		assert!(!options.log.packets);
		assert_eq!(options.resend.connecting_timeout, Duration::from_secs(1));
		assert_eq!(options.max_mac_failures, 2);
	}

	#[test]
	fn builder() {
		let options = ConnectOptions::new("127.0.0.1:9987".parse().unwrap())
			.name("Bot")
			.password("pw")
			.channel("Lobby");
		let s = toml::to_string(&options).unwrap();
		let parsed = ConnectOptions::from_toml(&s).unwrap();
		assert_eq!(parsed.name, "Bot");
		assert_eq!(parsed.password.as_deref(), Some("pw"));
		assert_eq!(parsed.channel.as_deref(), Some("Lobby"));
	}
}

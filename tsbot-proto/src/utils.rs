use std::net::IpAddr;

/// Try to approximate the not stabilized `ip.is_global()`.
pub fn is_global_ip(ip: &IpAddr) -> bool {
	if !ip.is_unspecified() && !ip.is_loopback() && !ip.is_multicast() {
		match *ip {
			IpAddr::V4(ref ip) => !ip.is_broadcast() && !ip.is_link_local() && !ip.is_private(),
			// Unique local and link local addresses
			IpAddr::V6(ref ip) => {
				let first = ip.segments()[0];
				(first & 0xfe00) != 0xfc00 && (first & 0xffc0) != 0xfe80
			}
		}
	} else {
		false
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn global_ips() {
		for ip in ["127.0.0.1", "10.1.2.3", "192.168.0.1", "0.0.0.0", "::1", "fe80::1", "fd00::2"] {
			assert!(!is_global_ip(&ip.parse().unwrap()), "{} is not global", ip);
		}
		for ip in ["1.1.1.1", "2001:db8::1"] {
			assert!(is_global_ip(&ip.parse().unwrap()), "{} is global", ip);
		}
	}
}

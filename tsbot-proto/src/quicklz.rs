//! QuickLZ level 1 decompression.
//!
//! Big command packets can be compressed by the server. The decoder rebuilds
//! the same hash table as the compressor, so back-references only work if
//! the output is produced strictly in order.
use crate::{Error, Result};

const HASH_VALUES: usize = 4096;
const CWORD_LEN: usize = 4;
/// Number of literal bytes before a set control bit.
const BITLUT: [usize; 16] = [4, 0, 1, 0, 2, 0, 1, 0, 3, 0, 1, 0, 2, 0, 1, 0];
/// The last bytes are always stored as literals.
const UNCOMPRESSED_END: usize = 11;

const FLAG_COMPRESSED: u8 = 0x1;
const FLAG_LONG_HEADER: u8 = 0x2;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Header {
	pub compressed: bool,
	pub level: u8,
	pub header_len: usize,
	pub compressed_size: usize,
	pub decompressed_size: u32,
}

impl Header {
	pub fn parse(data: &[u8]) -> Result<Self> {
		let flags = *data.first().ok_or(Error::Decompress("Empty input"))?;
		let level = (flags >> 2) & 0x3;
		let long = flags & FLAG_LONG_HEADER != 0;
		let header_len = if long { 9 } else { 3 };
		if data.len() < header_len {
			return Err(Error::Decompress("Header is truncated"));
		}
		let (compressed_size, decompressed_size) = if long {
			let mut c = [0; 4];
			let mut d = [0; 4];
			c.copy_from_slice(&data[1..5]);
			d.copy_from_slice(&data[5..9]);
			(u32::from_le_bytes(c) as usize, u32::from_le_bytes(d))
		} else {
			(usize::from(data[1]), u32::from(data[2]))
		};
		Ok(Self {
			compressed: flags & FLAG_COMPRESSED != 0,
			level,
			header_len,
			compressed_size,
			decompressed_size,
		})
	}
}

/// Decompress a QuickLZ block.
///
/// Fails if the block declares more than `max_size` decompressed bytes,
/// before anything is allocated.
pub fn decompress(data: &[u8], max_size: u32) -> Result<Vec<u8>> {
	let header = Header::parse(data)?;
	if header.level != 1 {
		return Err(Error::UnsupportedCompressionLevel(header.level));
	}
	if header.decompressed_size > max_size {
		return Err(Error::DecompressedSizeTooLarge { size: header.decompressed_size, max: max_size });
	}
	if header.compressed_size > data.len() {
		return Err(Error::Decompress("Compressed size is larger than the input"));
	}
	if header.compressed_size < header.header_len {
		return Err(Error::Decompress("Compressed size is smaller than the header"));
	}
	let data = &data[..header.compressed_size];
	let size = header.decompressed_size as usize;

	if !header.compressed {
		let end = header.header_len + size;
		if end != data.len() {
			return Err(Error::Decompress("Stored size does not match"));
		}
		return Ok(data[header.header_len..].to_vec());
	}

	Decoder {
		src: data,
		src_pos: header.header_len,
		dst: Vec::with_capacity(size),
		size,
		hashtable: [None; HASH_VALUES],
		next_hash: 0,
	}
	.run()
}

struct Decoder<'a> {
	src: &'a [u8],
	src_pos: usize,
	dst: Vec<u8>,
	size: usize,
	hashtable: [Option<usize>; HASH_VALUES],
	/// The next position in `dst` that has to be hashed.
	next_hash: usize,
}

impl<'a> Decoder<'a> {
	/// Read up to 4 bytes little endian, missing bytes are zero.
	fn fetch(&self) -> u32 {
		let mut buf = [0; 4];
		if let Some(rest) = self.src.get(self.src_pos..) {
			let len = std::cmp::min(4, rest.len());
			buf[..len].copy_from_slice(&rest[..len]);
		}
		u32::from_le_bytes(buf)
	}

	fn advance(&mut self, n: usize) -> Result<()> {
		if self.src_pos + n > self.src.len() {
			return Err(Error::Decompress("Unexpected end of input"));
		}
		self.src_pos += n;
		Ok(())
	}

	/// Hash all positions up to and including `max`.
	fn update_hash_upto(&mut self, max: usize) {
		while self.next_hash <= max {
			let pos = self.next_hash;
			let mut w = 0u32;
			for (i, b) in self.dst.iter().skip(pos).take(3).enumerate() {
				w |= u32::from(*b) << (i * 8);
			}
			let hash = ((w >> 12) ^ w) as usize & (HASH_VALUES - 1);
			self.hashtable[hash] = Some(pos);
			self.next_hash += 1;
		}
	}

	fn run(mut self) -> Result<Vec<u8>> {
		if self.size == 0 {
			return Ok(self.dst);
		}
		let mut cword_val: u32 = 1;
		loop {
			if cword_val == 1 {
				cword_val = self.fetch() | (1 << 31);
				self.advance(CWORD_LEN)?;
			}
			let fetch = self.fetch();

			if cword_val & 1 == 1 {
				cword_val >>= 1;
				let hash = ((fetch >> 4) & 0xfff) as usize;
				let offset = self.hashtable[hash].ok_or(Error::Decompress("Unset hash table entry"))?;
				let matchlen = if fetch & 0xf != 0 {
					self.advance(2)?;
					(fetch & 0xf) as usize + 2
				} else {
					self.advance(3)?;
					((fetch >> 16) & 0xff) as usize
				};

				let start = self.dst.len();
				if offset >= start {
					return Err(Error::Decompress("Invalid match offset"));
				}
				if start + matchlen > self.size {
					return Err(Error::Decompress("Match exceeds the declared size"));
				}
				// Source and destination overlap, copy byte by byte
				for i in 0..matchlen {
					let b = self.dst[offset + i];
					self.dst.push(b);
				}
				self.update_hash_upto(start);
				self.next_hash = self.dst.len();
			} else if self.dst.len() + UNCOMPRESSED_END < self.size {
				let n = BITLUT[(cword_val & 0xf) as usize];
				let start = self.src_pos;
				self.advance(n)?;
				self.dst.extend_from_slice(&self.src[start..start + n]);
				cword_val >>= n;
				if self.dst.len() >= 3 {
					self.update_hash_upto(self.dst.len() - 3);
				}
			} else {
				// Only literals until the end
				while self.dst.len() < self.size {
					if cword_val == 1 {
						self.advance(CWORD_LEN)?;
						cword_val = 1 << 31;
					}
					let b = *self
						.src
						.get(self.src_pos)
						.ok_or(Error::Decompress("Unexpected end of input"))?;
					self.dst.push(b);
					self.src_pos += 1;
					cword_val >>= 1;
				}
				return Ok(self.dst);
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use quickcheck_macros::quickcheck;

	use super::*;
	use crate::MAX_DECOMPRESSED_SIZE;

	fn hex(s: &str) -> Vec<u8> {
		(0..s.len()).step_by(2).map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap()).collect()
	}

	const LONG: &str = "477b000000f9000000000000c06e6f746966796368616e6e656c73756273637269626564\
		206369643d327c52f2000a2add342065733d33383637a35e3562213138363934a35e366c21376c2131316d2133\
		6d21636628b5314d665409008032326c21321d66326d66327d6633306c213136332065733d3138363934";
	const SHORT: &str = "45334b00085485636c69656e746c6973742051af643d3120636971e77c53af326a5b336a5b\
		346a5b3520636900000080643d31";

	#[test]
	fn long_header() {
		let data = hex(LONG);
		let res = decompress(&data, MAX_DECOMPRESSED_SIZE).unwrap();
		assert_eq!(
			std::str::from_utf8(&res).unwrap(),
			"notifychannelsubscribed cid=2|cid=4 es=3867|cid=5 es=18694|cid=6 es=18694|cid=7 \
			 es=18694|cid=11 es=18694|cid=13 es=18694|cid=14 es=18694|cid=16 es=18694|cid=22 \
			 es=18694|cid=23 es=18694|cid=24 es=18694|cid=25 es=18694|cid=30 es=18694|cid=163 \
			 es=18694"
		);
	}

	#[test]
	fn short_header() {
		let data = hex(SHORT);
		let header = Header::parse(&data).unwrap();
		assert_eq!(header.header_len, 3);
		assert_eq!(header.decompressed_size, 75);
		let res = decompress(&data, MAX_DECOMPRESSED_SIZE).unwrap();
		assert_eq!(
			&res[..],
			&b"clientlist clid=1 cid=1|clid=2 cid=1|clid=3 cid=1|clid=4 cid=1|clid=5 cid=1"[..]
		);
	}

	#[test]
	fn stored() {
		let mut data = vec![0x44, 3 + 5, 5];
		data.extend_from_slice(b"hello");
		assert_eq!(decompress(&data, 100).unwrap(), b"hello");
	}

	#[test]
	fn wrong_level() {
		let mut data = hex(SHORT);
		// Level 3
		data[0] = (data[0] & !0xc) | 0xc;
		assert!(matches!(
			decompress(&data, MAX_DECOMPRESSED_SIZE),
			Err(Error::UnsupportedCompressionLevel(3))
		));
	}

	#[test]
	fn too_large() {
		let data = hex(LONG);
		assert!(matches!(
			decompress(&data, 100),
			Err(Error::DecompressedSizeTooLarge { size: 249, max: 100 })
		));

		// A declared size of 4 GiB is rejected without allocating
		let mut data = data;
		data[5..9].copy_from_slice(&u32::MAX.to_le_bytes());
		assert!(matches!(
			decompress(&data, MAX_DECOMPRESSED_SIZE),
			Err(Error::DecompressedSizeTooLarge { .. })
		));
	}

	#[test]
	fn truncated() {
		let data = hex(LONG);
		for len in 0..data.len() {
			assert!(decompress(&data[..len], MAX_DECOMPRESSED_SIZE).is_err(), "Length {}", len);
		}

		// Correct compressed size but missing data
		let mut data = hex(SHORT);
		data.truncate(40);
		data[1] = 40;
		assert!(matches!(
			decompress(&data, MAX_DECOMPRESSED_SIZE),
			Err(Error::Decompress(_))
		));
	}

	#[test]
	fn corrupted_never_panics() {
		let data = hex(LONG);
		for i in 9..data.len() {
			for bit in 0..8 {
				let mut d = data.clone();
				d[i] ^= 1 << bit;
				if let Ok(r) = decompress(&d, MAX_DECOMPRESSED_SIZE) {
					assert_eq!(r.len(), 249);
				}
			}
		}
	}

	#[quickcheck]
	fn arbitrary_input(data: Vec<u8>) -> bool {
		match decompress(&data, MAX_DECOMPRESSED_SIZE) {
			Ok(r) => r.len() <= MAX_DECOMPRESSED_SIZE as usize,
			Err(_) => true,
		}
	}
}

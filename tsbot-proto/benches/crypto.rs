use base64::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, Bencher, Criterion};
use tsbot_packets::packets::{Direction, OutCommand, PacketType};
use tsbot_proto::algorithms::{self as algs, SharedIv};
use tsbot_proto::context::CryptoContext;
use tsbot_proto::identity::get_hash_cash_level;
use tsbot_proto::license::Licenses;
use tsbot_types::eax;

const STANDARD_LICENSE: &str = "AQA1hUFJiiSs0wFXkYuPUJVcDa6XCrZTcsvkB0\
		Ffzz4CmwIITRXgCqeTYAcAAAAgQW5vbnltb3VzAACiIBip9hQaK6P3QhwOJs/BkPn0i\
		oyIDPaNgzJ6M8x0kiAJf4hxCYAxMQ==";

const AAL_LICENSE: &str = "AQCvbHFTQDY/terPeilrp/ECU9xCH5U3xC92lY\
		TNaY/0KQAJFueAazbsgAAAACVUZWFtU3BlYWsgU3lzdGVtcyBHbWJIAABhl9gwla/UJ\
		p2Eszst9TRVXO/PeE6a6d+CTI6Pg7OEVgAJc5CrL4Nh8gAAACRUZWFtU3BlYWsgc3lz\
		dGVtcyBHbWJIAACvTQIgpv6zmLZq3znh7ygmOSokGFkFjz4bTigrOnetrgIJdIIACdS\
		/gAYAAAAAU29zc2VuU3lzdGVtcy5iaWQAADY7+uV1CQ1niOvYSdGzsu83kPTNWijovr\
		3B78eHGeePIAm98vQJvpu0";

fn license_parse(b: &mut Bencher, license: &str) {
	let license = BASE64_STANDARD.decode(license).unwrap();
	b.iter(|| Licenses::parse_ignore_expired(black_box(&license)).unwrap());
}

fn license_derive_key(b: &mut Bencher, license: &str) {
	let licenses = Licenses::parse_ignore_expired(&BASE64_STANDARD.decode(license).unwrap()).unwrap();
	let ctx = CryptoContext::default();
	b.iter(|| licenses.derive_public_key(&ctx).unwrap().compress().0);
}

fn bench_license(c: &mut Criterion) {
	c.bench_function("parse standard license", |b| license_parse(b, STANDARD_LICENSE));
	c.bench_function("parse aal license", |b| license_parse(b, AAL_LICENSE));

	c.bench_function("derive key standard license", |b| license_derive_key(b, STANDARD_LICENSE));
	c.bench_function("derive key aal license", |b| license_derive_key(b, AAL_LICENSE));
}

fn bench_packets(c: &mut Criterion) {
	let iv = SharedIv::Protocol31([0x42; 64]);
	c.bench_function("create key nonce", |b| {
		b.iter(|| {
			algs::create_key_nonce(Direction::C2S, PacketType::Command, black_box(2), 0, &iv)
		})
	});

	let packet = OutCommand::from_raw(
		Direction::C2S,
		PacketType::Command,
		"sendtextmessage targetmode=3 target=1 msg=Hello\\sWorld",
	);
	c.bench_function("encrypt command", |b| {
		b.iter(|| {
			let mut p = packet.clone();
			algs::encrypt(&mut p, 0, &iv);
			p
		})
	});

	let data = vec![0x55; 487];
	c.bench_function("eax 487 bytes", |b| {
		b.iter(|| {
			let mut d = data.clone();
			eax::encrypt(&[1; 16], &[2; 16], &[3; 5], &mut d)
		})
	});
}

fn bench_hash_cash(c: &mut Criterion) {
	let omega = "MEwDAgcAAgEgAiEAqNonGuL0w/8kLlgLbl4UkH8DQQJk8HRs7mw6zFGq9aQCIDBxJTiXVSoi6rsvtXkvVp4NB+FmnR/V2aK+LoQzrETb";
	c.bench_function("hash cash level", |b| {
		let mut offset = 0u64;
		b.iter(|| {
			offset += 1;
			get_hash_cash_level(omega, offset)
		})
	});
}

criterion_group!(benches, bench_license, bench_packets, bench_hash_cash);
criterion_main!(benches);

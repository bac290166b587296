//! The line based command language.
//!
//! A command is a name followed by `key=value` pairs, separated by spaces.
//! Multiple parameter groups are separated by `|`. Values are escaped so they
//! never contain whitespace or `|`.
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use nom::branch::alt;
use nom::bytes::complete::{is_not, tag};
use nom::character::complete::{multispace0, multispace1};
use nom::combinator::{map, opt};
use nom::error::{Error as NomError, ErrorKind};
use nom::multi::{many0, many1};
use nom::IResult;

use crate::{Error, Result};

/// Escape a command name or value.
///
/// Returns the input unchanged if nothing needs to be escaped.
pub fn escape(s: &str) -> Cow<str> {
	if !s.chars().any(|c| escape_char(c).is_some()) {
		return Cow::Borrowed(s);
	}
	let mut res = String::with_capacity(s.len() + 8);
	for c in s.chars() {
		match escape_char(c) {
			Some(e) => res.push_str(e),
			None => res.push(c),
		}
	}
	Cow::Owned(res)
}

#[inline]
fn escape_char(c: char) -> Option<&'static str> {
	Some(match c {
		'\u{b}' => "\\v",
		'\u{c}' => "\\f",
		'\\' => "\\\\",
		'\t' => "\\t",
		'\r' => "\\r",
		'\n' => "\\n",
		'|' => "\\p",
		' ' => "\\s",
		'/' => "\\/",
		_ => return None,
	})
}

/// Reverse [`escape`].
///
/// A backslash at the end of the string or in front of an unknown character
/// is an error.
pub fn unescape(s: &str) -> Result<Cow<str>> {
	if !s.contains('\\') {
		return Ok(Cow::Borrowed(s));
	}
	let mut res = String::with_capacity(s.len());
	let mut chars = s.chars();
	while let Some(c) = chars.next() {
		if c != '\\' {
			res.push(c);
			continue;
		}
		res.push(match chars.next() {
			Some('v') => '\u{b}',
			Some('f') => '\u{c}',
			Some('\\') => '\\',
			Some('t') => '\t',
			Some('r') => '\r',
			Some('n') => '\n',
			Some('p') => '|',
			Some('s') => ' ',
			Some('/') => '/',
			Some(c) => {
				return Err(Error::ParseCommand(format!("Unknown escape sequence \\{}", c)));
			}
			None => return Err(Error::ParseCommand("Trailing backslash".into())),
		});
	}
	Ok(Cow::Owned(res))
}

/// A parameter value for [`build`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum CommandArg<'a> {
	Str(Cow<'a, str>),
	Int(i128),
	Bool(bool),
	/// Written as the bare key, without `=`.
	Flag,
	/// Not written at all.
	Absent,
}

impl<'a> From<&'a str> for CommandArg<'a> {
	fn from(s: &'a str) -> Self { CommandArg::Str(Cow::Borrowed(s)) }
}

impl<'a> From<String> for CommandArg<'a> {
	fn from(s: String) -> Self { CommandArg::Str(Cow::Owned(s)) }
}

impl<'a> From<bool> for CommandArg<'a> {
	fn from(b: bool) -> Self { CommandArg::Bool(b) }
}

macro_rules! int_args {
	($($t:ty),*) => {
		$(impl<'a> From<$t> for CommandArg<'a> {
			fn from(i: $t) -> Self { CommandArg::Int(i.into()) }
		})*
	};
}
int_args!(u8, u16, u32, u64, i8, i16, i32, i64);

impl<'a, T: Into<CommandArg<'a>>> From<Option<T>> for CommandArg<'a> {
	fn from(o: Option<T>) -> Self { o.map(Into::into).unwrap_or(CommandArg::Absent) }
}

/// Write a command with a single parameter group.
///
/// # Examples
/// ```
/// use tsbot_packets::commands::{build, CommandArg};
///
/// let s = build("clientinitiv", vec![
/// 	("alpha", CommandArg::from("a/b")),
/// 	("ot", 1u8.into()),
/// 	("ip", CommandArg::Flag),
/// 	("unused", CommandArg::Absent),
/// ]);
/// assert_eq!(s, "clientinitiv alpha=a\\/b ot=1 ip");
/// ```
pub fn build<'a, I: IntoIterator<Item = (&'a str, CommandArg<'a>)>>(
	name: &str, params: I,
) -> String {
	let mut res = escape(name).into_owned();
	for (k, v) in params {
		let v = match v {
			CommandArg::Absent => continue,
			CommandArg::Flag => {
				res.push(' ');
				res.push_str(k);
				continue;
			}
			CommandArg::Str(s) => s,
			CommandArg::Int(i) => Cow::Owned(i.to_string()),
			CommandArg::Bool(b) => Cow::Borrowed(if b { "1" } else { "0" }),
		};
		res.push(' ');
		res.push_str(k);
		res.push('=');
		res.push_str(&escape(&v));
	}
	res
}

/// The parameters of one group, in the order they appeared.
///
/// Inserting a key that already exists overwrites the old value.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Params(Vec<(String, String)>);

impl Params {
	pub fn new() -> Self { Self::default() }

	pub fn insert<K: Into<String>, V: Into<String>>(&mut self, key: K, value: V) {
		let key = key.into();
		let value = value.into();
		if let Some(e) = self.0.iter_mut().find(|(k, _)| *k == key) {
			e.1 = value;
		} else {
			self.0.push((key, value));
		}
	}

	#[inline]
	pub fn get(&self, key: &str) -> Option<&str> {
		self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
	}

	#[inline]
	pub fn has(&self, key: &str) -> bool { self.get(key).is_some() }

	/// Get and parse a parameter.
	pub fn get_parse<F: FromStr>(&self, key: &str) -> Result<F> {
		let value = self.get(key).ok_or_else(|| Error::MissingParameter(key.into()))?;
		value
			.parse()
			.map_err(|_| Error::InvalidParameter { name: key.into(), value: value.into() })
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
		self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
	}

	#[inline]
	pub fn len(&self) -> usize { self.0.len() }
	#[inline]
	pub fn is_empty(&self) -> bool { self.0.is_empty() }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Params {
	fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
		let mut res = Self::new();
		for (k, v) in iter {
			res.insert(k, v);
		}
		res
	}
}

/// A parsed, owned command.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Command {
	/// Empty for serverquery replies.
	pub name: String,
	/// The first parameter group.
	pub params: Params,
	/// All parameter groups, only filled if there is more than one.
	pub groups: Vec<Params>,
}

impl Command {
	pub fn parse(raw: &str) -> Result<Self> { parse(raw) }

	#[inline]
	pub fn get(&self, key: &str) -> Option<&str> { self.params.get(key) }
	#[inline]
	pub fn has(&self, key: &str) -> bool { self.params.has(key) }
	#[inline]
	pub fn get_parse<F: FromStr>(&self, key: &str) -> Result<F> { self.params.get_parse(key) }

	/// Iterate over all groups, also if there is only one.
	pub fn iter(&self) -> impl Iterator<Item = &Params> {
		let single = if self.groups.is_empty() { Some(&self.params) } else { None };
		single.into_iter().chain(self.groups.iter())
	}
}

impl fmt::Display for Command {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{}", escape(&self.name))?;
		let mut first_group = true;
		for g in self.iter() {
			if !first_group {
				write!(f, "|")?;
			}
			let mut first = !first_group || self.name.is_empty();
			first_group = false;
			for (k, v) in g.iter() {
				if !first {
					write!(f, " ")?;
				}
				first = false;
				write!(f, "{}={}", k, escape(v))?;
			}
		}
		Ok(())
	}
}

/// Parse a command line into an owned [`Command`].
pub fn parse(raw: &str) -> Result<Command> {
	let cmd = parse_groups(raw)?;
	let params: Params = cmd.static_args.iter().map(|(k, v)| (*k, v.as_ref())).collect();
	let groups = if cmd.list_args.is_empty() {
		Vec::new()
	} else {
		let mut groups = vec![params.clone()];
		groups.extend(
			cmd.list_args.iter().map(|g| g.iter().map(|(k, v)| (*k, v.as_ref())).collect()),
		);
		groups
	};
	Ok(Command { name: cmd.name.into_owned(), params, groups })
}

fn command_arg(i: &str) -> IResult<&str, (&str, Cow<str>)> {
	let (i, _) = multispace0(i)?;
	let (i, name) = is_not("\u{b}\u{c}\\\t\r\n| /=")(i)?;
	let (i, value) = opt(|i| {
		let (i, _) = tag("=")(i)?;
		let (i, prefix) = opt(is_not("\u{b}\u{c}\\\t\r\n| "))(i)?;
		let (i, rest) = many0(alt((
			map(tag("\\v"), |_| "\x0b"),
			map(tag("\\f"), |_| "\x0c"),
			map(tag("\\\\"), |_| "\\"),
			map(tag("\\t"), |_| "\t"),
			map(tag("\\r"), |_| "\r"),
			map(tag("\\n"), |_| "\n"),
			map(tag("\\p"), |_| "|"),
			map(tag("\\s"), |_| " "),
			map(tag("\\/"), |_| "/"),
			is_not("\u{b}\u{c}\\\t\r\n| "),
		)))(i)?;

		let res = if rest.is_empty() {
			Cow::Borrowed(prefix.unwrap_or(""))
		} else {
			Cow::Owned(format!("{}{}", prefix.unwrap_or(""), rest.concat()))
		};

		Ok((i, res))
	})(i)?;
	let value = value.unwrap_or(Cow::Borrowed(""));

	Ok((i, (name, value)))
}

/// The escaped first word of a command.
///
/// A word that contains `=` is a parameter, serverquery replies have no name.
fn command_name(i: &str) -> IResult<&str, Cow<str>> {
	let (rest, word) = is_not("\u{b}\u{c}\t\r\n| ")(i)?;
	if word.contains('=') {
		return Err(nom::Err::Error(NomError::new(i, ErrorKind::Verify)));
	}
	let name = unescape(word).map_err(|_| nom::Err::Failure(NomError::new(i, ErrorKind::Escaped)))?;
	let rest = if rest.is_empty() || rest.starts_with('|') { rest } else { multispace1(rest)?.0 };
	Ok((rest, name))
}

fn inner_parse_command(i: &str) -> IResult<&str, CommandData> {
	let (i, name) = alt((command_name, map(tag(""), Cow::Borrowed)))(i)?;

	let (i, static_args) = many0(command_arg)(i)?;
	let (i, list_args) = many0(|i| {
		let (i, _) = multispace0(i)?;
		let (i, _) = tag("|")(i)?;
		let (i, args) = many1(command_arg)(i)?;
		Ok((i, args))
	})(i)?;

	let (i, _) = multispace0(i)?;

	Ok((i, CommandData { name, static_args, list_args }))
}

/// A borrowed view of a command.
///
/// Values are only copied if they contain escape sequences.
#[derive(Clone, Debug)]
pub struct CommandData<'a> {
	/// The name is empty for serverquery commands
	pub name: Cow<'a, str>,
	pub static_args: Vec<(&'a str, Cow<'a, str>)>,
	pub list_args: Vec<Vec<(&'a str, Cow<'a, str>)>>,
}

/// Split the line into its first group and the following groups.
fn parse_groups(s: &str) -> Result<CommandData> {
	match inner_parse_command(s) {
		Ok((rest, cmd)) => {
			if !rest.is_empty() {
				return Err(Error::ParseCommand(format!(
					"Command was not parsed completely {:?}",
					rest
				)));
			}
			Ok(cmd)
		}
		Err(e) => Err(Error::ParseCommand(format!("{:?}", e))),
	}
}

/// Parse a command without copying it.
///
/// Arguments of the first group that reappear in later groups are moved into
/// `list_args`, everything else stays in `static_args`.
pub fn parse_command(s: &str) -> Result<CommandData> {
	let mut cmd = parse_groups(s)?;
	if !cmd.list_args.is_empty() {
		let mut la = Vec::new();
		for (arg, _) in &cmd.list_args[0] {
			if let Some(i) = cmd.static_args.iter().position(|(k, _)| k == arg) {
				la.push(cmd.static_args.remove(i));
			}
		}
		cmd.list_args.insert(0, la);
	}
	Ok(cmd)
}

#[cfg(test)]
mod tests {
	use quickcheck_macros::quickcheck;

	use super::*;

	#[test]
	fn escape_all() {
		assert_eq!(escape("a b|c\\d/e\tf\ng\rh\u{b}i\u{c}"), "a\\sb\\pc\\\\d\\/e\\tf\\ng\\rh\\vi\\f");
		assert!(matches!(escape("plain"), Cow::Borrowed("plain")));
	}

	#[test]
	fn unescape_errors() {
		assert_eq!(unescape("a\\sb").unwrap(), "a b");
		assert!(matches!(unescape("a\\x"), Err(Error::ParseCommand(_))));
		assert!(matches!(unescape("a\\"), Err(Error::ParseCommand(_))));
	}

	#[test]
	fn build_args() {
		let s = build("sendtextmessage", vec![
			("targetmode", CommandArg::from(3u8)),
			("msg", "Hello | world".into()),
			("enabled", true.into()),
			("disabled", false.into()),
			("negative", (-5i32).into()),
			("missing", Option::<u16>::None.into()),
		]);
		assert_eq!(
			s,
			"sendtextmessage targetmode=3 msg=Hello\\s\\p\\sworld enabled=1 disabled=0 negative=-5"
		);
	}

	#[test]
	fn simple() {
		let cmd = parse("cmd a=1 b=2 c=3").unwrap();
		assert_eq!(cmd.name, "cmd");
		assert_eq!(cmd.params.iter().collect::<Vec<_>>(), vec![("a", "1"), ("b", "2"), ("c", "3")]);
		assert!(cmd.groups.is_empty());
	}

	#[test]
	fn escaped_values() {
		let cmd = parse("cmd a=\\s\\\\ b=\\p c=abc\\tdef").unwrap();
		assert_eq!(cmd.get("a"), Some(" \\"));
		assert_eq!(cmd.get("b"), Some("|"));
		assert_eq!(cmd.get("c"), Some("abc\tdef"));
	}

	#[test]
	fn groups() {
		let cmd = parse("cmd a=1 c=3 b=2|b=4|b=5").unwrap();
		assert_eq!(cmd.params.iter().collect::<Vec<_>>(), vec![("a", "1"), ("c", "3"), ("b", "2")]);
		assert_eq!(cmd.groups.len(), 3);
		assert_eq!(cmd.groups[0], cmd.params);
		assert_eq!(cmd.groups[2].get("b"), Some("5"));
		assert_eq!(cmd.iter().count(), 3);

		let data = parse_command("cmd a=1 c=3 b=2|b=4|b=5").unwrap();
		assert_eq!(data.static_args, vec![("a", "1".into()), ("c", "3".into())]);
		assert_eq!(data.list_args, vec![
			vec![("b", "2".into())],
			vec![("b", "4".into())],
			vec![("b", "5".into())],
		]);
	}

	#[test]
	fn duplicate_keys_overwrite() {
		let cmd = parse("cmd a=1 b=2 a=3").unwrap();
		assert_eq!(cmd.params.iter().collect::<Vec<_>>(), vec![("a", "3"), ("b", "2")]);
	}

	#[test]
	fn optional_arg() {
		let cmd = parse("cmd a").unwrap();
		assert_eq!(cmd.name, "cmd");
		assert_eq!(cmd.get("a"), Some(""));

		let cmd = parse("cmd a b=1").unwrap();
		assert_eq!(cmd.params.iter().collect::<Vec<_>>(), vec![("a", ""), ("b", "1")]);

		let cmd = parse("cmd a= b=1").unwrap();
		assert_eq!(cmd.params.iter().collect::<Vec<_>>(), vec![("a", ""), ("b", "1")]);
	}

	#[test]
	fn invalid_escape_in_value() {
		assert!(matches!(parse("cmd a=b\\x"), Err(Error::ParseCommand(_))));
	}

	#[test]
	fn parameter_accessors() {
		let cmd = parse("initserver aclid=5 virtualserver_name=Test").unwrap();
		assert_eq!(cmd.get_parse::<u16>("aclid").unwrap(), 5);
		assert!(matches!(
			cmd.get_parse::<u16>("virtualserver_name"),
			Err(Error::InvalidParameter { .. })
		));
		assert!(matches!(cmd.get_parse::<u16>("cid"), Err(Error::MissingParameter(_))));
	}

	#[test]
	fn initivexpand2() {
		let cmd = parse("initivexpand2 l=AQCVXTlKF+UQc0yga99dOQ9FJCwLaJqtDb1G7xYPMvHFMwIKVfKADF6zAAcAAAAgQW5vbnltb3VzAAAKQo71lhtEMbqAmtuMLlY8Snr0k2Wmymv4hnHNU6tjQCALKHewCykgcA== beta=\\/8kL8lcAYyMJovVOP6MIUC1oZASyuL\\/Y\\/qjVG06R4byuucl9oPAvR7eqZI7z8jGm9jkGmtJ6 omega=MEsDAgcAAgEgAiBxu2eCLQf8zLnuJJ6FtbVjfaOa1210xFgedoXuGzDbTgIgcGk35eqFavKxS4dROi5uKNSNsmzIL4+fyh5Z\\/+FWGxU= ot=1 proof=MEUCIQDRCP4J9e+8IxMJfCLWWI1oIbNPGcChl+3Jr2vIuyDxzAIgOrzRAFPOuJZF4CBw\\/xgbzEsgKMtEtgNobF6WXVNhfUw= tvd time=1544221457").unwrap();
		assert_eq!(cmd.name, "initivexpand2");
		assert_eq!(
			cmd.get("beta"),
			Some("/8kL8lcAYyMJovVOP6MIUC1oZASyuL/Y/qjVG06R4byuucl9oPAvR7eqZI7z8jGm9jkGmtJ6")
		);
		assert_eq!(cmd.get("tvd"), Some(""));
		assert_eq!(cmd.get_parse::<u64>("time").unwrap(), 1544221457);
	}

	#[test]
	fn clientinitiv() {
		let cmd = parse(
			"clientinitiv alpha=41Te9Ar7hMPx+A== \
			 omega=MEwDAgcAAgEgAiEAq2iCMfcijKDZ5tn2tuZcH+\\/\
			 GF+dmdxlXjDSFXLPGadACIHzUnbsPQ0FDt34Su4UXF46VFI0+4wjMDNszdoDYocu0 \
			 ip",
		)
		.unwrap();
		assert_eq!(cmd.name, "clientinitiv");
		assert!(cmd.has("ip"));
		assert_eq!(cmd.get("alpha"), Some("41Te9Ar7hMPx+A=="));
	}

	#[test]
	fn initserver() {
		// Well, that's more corrupted packet, but the parser should be robust
		let s = "initserver virtualserver_name=Server\\sder\\sVerplanten \
		         virtualserver_welcomemessage=This\\sis\\sSplamys\\sWorld \
		         virtualserver_platform=Linux \
		         virtualserver_version=3.0.13.8\\s[Build:\\s1500452811] \
		         virtualserver_maxclients=32 virtualserver_created=0 \
		         virtualserver_nodec_encryption_mode=1 \
		         virtualserver_hostmessage=Lé\\sServer\\sde\\sSplamy \
		         virtualserver_name=Server_mode=0 virtualserver_default_server \
		         group=8 virtualserver_default_channel_group=8 \
		         virtualserver_hostbanner_url virtualserver_hostmessagegfx_url \
		         virtualserver_hostmessagegfx_interval=2000 \
		         virtualserver_priority_speaker_dimm_modificat";
		let cmd = parse(s).unwrap();
		assert_eq!(cmd.name, "initserver");
		assert_eq!(cmd.get("virtualserver_name"), Some("Server_mode=0"));
		assert_eq!(cmd.get("virtualserver_hostmessage"), Some("Lé Server de Splamy"));
	}

	#[test]
	fn channellist() {
		let s = "channellist cid=2 cpid=0 channel_name=Trusted\\sChannel \
		         channel_topic channel_codec=0 channel_codec_quality=0 \
		         channel_maxclients=0 channel_maxfamilyclients=-1 channel_order=1 \
		         channel_flag_permanent=1 channel_flag_semi_permanent=0 \
		         channel_flag_default=0 channel_flag_password=0 \
		         channel_codec_latency_factor=1 channel_codec_is_unencrypted=1 \
		         channel_delete_delay=0 channel_flag_maxclients_unlimited=0 \
		         channel_flag_maxfamilyclients_unlimited=0 \
		         channel_flag_maxfamilyclients_inherited=1 \
		         channel_needed_talk_power=0 channel_forced_silence=0 \
		         channel_name_phonetic channel_icon_id=0 \
		         channel_flag_private=0|cid=4 cpid=2 \
		         channel_name=Ding\\s•\\s1\\s\\p\\sSplamy´s\\sBett channel_topic \
		         channel_codec=4 channel_codec_quality=7 channel_maxclients=-1 \
		         channel_maxfamilyclients=-1 channel_order=0 \
		         channel_flag_permanent=1 channel_flag_semi_permanent=0 \
		         channel_flag_default=0 channel_flag_password=0 \
		         channel_codec_latency_factor=1 channel_codec_is_unencrypted=1 \
		         channel_delete_delay=0 channel_flag_maxclients_unlimited=1 \
		         channel_flag_maxfamilyclients_unlimited=0 \
		         channel_flag_maxfamilyclients_inherited=1 \
		         channel_needed_talk_power=0 channel_forced_silence=0 \
		         channel_name_phonetic=Neo\\sSeebi\\sEvangelion channel_icon_id=0 \
		         channel_flag_private=0";
		let cmd = parse(s).unwrap();
		assert_eq!(cmd.name, "channellist");
		assert_eq!(cmd.groups.len(), 2);
		assert_eq!(cmd.groups[1].get("channel_name"), Some("Ding • 1 | Splamy´s Bett"));
		assert_eq!(cmd.groups[1].get_parse::<i32>("channel_maxclients").unwrap(), -1);
	}

	#[test]
	fn subscribe() {
		let s = "notifychannelsubscribed cid=2|cid=4 es=3867|cid=5 \
		         es=18694|cid=6 es=18694|cid=7 es=18694|cid=11 \
		         es=18694|cid=13 es=18694|cid=14 es=18694|cid=16 \
		         es=18694|cid=22 es=18694|cid=23 es=18694|cid=24 \
		         es=18694|cid=25 es=18694|cid=30 es=18694|cid=163 es=18694";
		let cmd = parse(s).unwrap();
		assert_eq!(cmd.name, "notifychannelsubscribed");
		assert_eq!(cmd.groups.len(), 15);
		assert!(!cmd.groups[0].has("es"));
	}

	#[test]
	fn serverquery_command() {
		let cmd = parse("cmd=1 cid=2").unwrap();
		assert_eq!(cmd.name, "");
		assert_eq!(cmd.params.iter().collect::<Vec<_>>(), vec![("cmd", "1"), ("cid", "2")]);
		assert_eq!(cmd.to_string(), "cmd=1 cid=2");
	}

	#[test]
	fn escaped_names() {
		for name in ["client_init", "my cmd", "a/b", "x|y", "tab\there"] {
			let s = build(name, vec![("a", CommandArg::from(1u8))]);
			let cmd = parse(&s).unwrap();
			assert_eq!(cmd.name, name, "{}", s);
			assert_eq!(cmd.params.iter().collect::<Vec<_>>(), vec![("a", "1")]);
		}
		assert_eq!(parse("my\\scmd a=1").unwrap().name, "my cmd");
		assert!(matches!(parse("bad\\x a=1"), Err(Error::ParseCommand(_))));
	}

	#[test]
	fn no_arguments() {
		let cmd = parse("channellistfinished").unwrap();
		assert_eq!(cmd.name, "channellistfinished");
		assert!(cmd.params.is_empty());
		assert!(cmd.groups.is_empty());
	}

	#[test]
	fn newline_command() {
		let cmd = parse("sendtextmessage text=\\nmess\\nage\\n return_code=11").unwrap();
		assert_eq!(cmd.name, "sendtextmessage");
		assert_eq!(cmd.get("text"), Some("\nmess\nage\n"));
	}

	#[test]
	fn display_groups() {
		let s = "notifychannelsubscribed cid=2|cid=4 es=3867";
		assert_eq!(parse(s).unwrap().to_string(), s);
	}

	fn printable(s: &str) -> String {
		s.chars().filter(|c| c.is_ascii() && (!c.is_ascii_control() || *c == '\t')).collect()
	}

	#[quickcheck]
	fn build_parse(name: String, a: String, b: String) -> bool {
		// An unescaped `=` turns the name into a serverquery parameter
		let name = printable(&name).replace('=', "");
		let a = printable(&a);
		let b = printable(&b);
		let s = build(&name, vec![("a", CommandArg::from(a.as_str())), ("b", b.as_str().into())]);
		let cmd = parse(&s).unwrap();
		cmd.name == name && cmd.get("a") == Some(a.as_str()) && cmd.get("b") == Some(b.as_str())
	}

	#[quickcheck]
	fn escape_unescape(s: String) -> bool { unescape(&escape(&s)).unwrap() == s }
}

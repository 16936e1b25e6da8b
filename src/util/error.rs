//! Crate-wide error type shared by every shardkv crate.

use std::io;

use err_derive::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error(display = "IO error: {}", _0)]
	Io(#[error(source)] io::Error),

	#[error(display = "Error in msgpack encoding: {}", _0)]
	RmpEncode(#[error(source)] rmp_serde::encode::Error),
	#[error(display = "Error in msgpack decoding: {}", _0)]
	RmpDecode(#[error(source)] rmp_serde::decode::Error),

	#[error(display = "Error in Toml decoding: {}", _0)]
	TomlDecode(#[error(source)] toml::de::Error),

	#[error(display = "Tokio join error: {}", _0)]
	TokioJoin(#[error(source)] tokio::task::JoinError),

	#[error(display = "Storage engine error: {}", _0)]
	Db(#[error(source)] shardkv_db::Error),

	#[error(display = "RPC error: {}", _0)]
	Rpc(String),

	#[error(display = "{}", _0)]
	Message(String),
}

impl Error {
	pub fn unexpected_rpc_message<T: std::fmt::Debug>(v: T) -> Self {
		Self::Message(format!("Unexpected RPC message: {:?}", v))
	}
}

impl From<String> for Error {
	fn from(s: String) -> Error {
		Error::Message(s)
	}
}

impl From<&str> for Error {
	fn from(s: &str) -> Error {
		Error::Message(s.to_string())
	}
}

/// Mirrors `Option::ok_or` with a message constructor, the way the teacher's
/// error module spells out "this channel/value should always be present".
pub trait OkOrMessage {
	type S;
	fn ok_or_message<M: Into<String>>(self, message: M) -> Result<Self::S, Error>;
}

impl<S> OkOrMessage for Option<S> {
	type S = S;
	fn ok_or_message<M: Into<String>>(self, message: M) -> Result<S, Error> {
		match self {
			Some(x) => Ok(x),
			None => Err(Error::Message(message.into())),
		}
	}
}

// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use mtkit_mtproto::{mtp, transport};
use mtkit_session::Dropped;
use mtkit_tl_types as tl;
use std::fmt;
use std::io;

/// Why a connection could not go on reading from the server.
#[derive(Debug)]
pub enum ReadError {
    Io(io::Error),
    /// The framing was broken.
    Transport(transport::Error),
    /// A frame arrived but its contents made no sense.
    Deserialize(mtp::DeserializeError),
    /// The peer spoke HTTP, so a proxy in between is probably intercepting
    /// the connection.
    HttpResponse,
}

impl std::error::Error for ReadError {}

// `io::Error` is not `Clone`, but every service that sees a failure needs
// its own copy.
impl Clone for ReadError {
    fn clone(&self) -> Self {
        match self {
            Self::Io(e) => Self::Io(match e.raw_os_error() {
                Some(code) => io::Error::from_raw_os_error(code),
                None => io::Error::new(e.kind(), e.to_string()),
            }),
            Self::Transport(e) => Self::Transport(e.clone()),
            Self::Deserialize(e) => Self::Deserialize(e.clone()),
            Self::HttpResponse => Self::HttpResponse,
        }
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("read failed: ")?;
        match self {
            Self::Io(err) => write!(f, "{err}"),
            Self::Transport(err) => write!(f, "bad framing: {err}"),
            Self::Deserialize(err) => write!(f, "{err}"),
            Self::HttpResponse => write!(f, "peer answered with HTTP"),
        }
    }
}

impl From<io::Error> for ReadError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<transport::Error> for ReadError {
    fn from(error: transport::Error) -> Self {
        Self::Transport(error)
    }
}

impl From<mtp::DeserializeError> for ReadError {
    fn from(error: mtp::DeserializeError) -> Self {
        Self::Deserialize(error)
    }
}

impl From<tl::deserialize::Error> for ReadError {
    fn from(error: tl::deserialize::Error) -> Self {
        mtp::DeserializeError::from(error).into()
    }
}

/// An `rpc_error` sent by the server, split into its parts.
///
/// Error messages such as `FLOOD_WAIT_31` carry a number, which is moved
/// out of [`RpcError::name`] and into [`RpcError::value`].
#[derive(Clone, Debug, PartialEq)]
pub struct RpcError {
    /// Works like an HTTP status: 4xx are caller mistakes, 5xx are the
    /// server's problem.
    pub code: i32,
    /// Upper-case name without the numeric part.
    pub name: String,
    pub value: Option<u32>,
    /// Constructor of the request that failed, when known.
    pub caused_by: Option<u32>,
}

impl std::error::Error for RpcError {}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "rpc error {}: {}", self.code, self.name)?;
        if let Some(value) = self.value {
            write!(f, " ({value})")?;
        }
        if let Some(caused_by) = self.caused_by {
            write!(f, " from request {caused_by:08x}")?;
        }
        Ok(())
    }
}

/// Splits `FLOOD_WAIT_31` into `FLOOD_WAIT` and `31`. Only the first number
/// found is taken out.
fn split_error_value(message: &str) -> (String, Option<u32>) {
    let parts = message.split('_').collect::<Vec<_>>();
    let numeric = parts.iter().enumerate().find_map(|(index, part)| {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        part.parse::<u32>().ok().map(|value| (index, value))
    });

    match numeric {
        Some((index, value)) => {
            let name = parts
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != index)
                .map(|(_, part)| *part)
                .collect::<Vec<_>>()
                .join("_");
            (name, Some(value))
        }
        None => (message.to_owned(), None),
    }
}

impl From<tl::mtproto::RpcError> for RpcError {
    fn from(error: tl::mtproto::RpcError) -> Self {
        let (name, value) = split_error_value(&error.error_message);
        Self {
            code: error.error_code,
            name,
            value,
            caused_by: None,
        }
    }
}

impl RpcError {
    /// Compare the error name. A `*` at either end of `pattern` matches any
    /// prefix or suffix.
    ///
    /// ```
    /// # let error = mtkit_mtsender::RpcError {
    /// #     code: 303, name: "PHONE_MIGRATE".to_string(), value: Some(4), caused_by: None };
    /// assert!(error.is("PHONE_MIGRATE"));
    /// assert!(error.is("*_MIGRATE"));
    /// assert!(!error.is("USER_*"));
    /// ```
    pub fn is(&self, pattern: &str) -> bool {
        match (pattern.strip_prefix('*'), pattern.strip_suffix('*')) {
            (_, Some(prefix)) => self.name.starts_with(prefix),
            (Some(suffix), None) => self.name.ends_with(suffix),
            (None, None) => self.name == pattern,
        }
    }

    pub fn with_caused_by(self, constructor_id: u32) -> Self {
        Self {
            caused_by: Some(constructor_id),
            ..self
        }
    }
}

/// How invoking a request can fail.
#[derive(Debug)]
pub enum InvocationError {
    /// The server answered with an error.
    Rpc(RpcError),
    /// The request was cancelled, or its service went away, so no answer
    /// will ever arrive.
    Dropped,
    Timeout,
    /// The body can never be sent as it is.
    InvalidRequest(mtp::PushError),
    /// The answer arrived but could not be read.
    Read(ReadError),
}

impl std::error::Error for InvocationError {}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc(err) => fmt::Display::fmt(err, f),
            Self::Dropped => write!(f, "request dropped before an answer arrived"),
            Self::Timeout => write!(f, "request timed out"),
            Self::InvalidRequest(err) => write!(f, "invalid request: {err}"),
            Self::Read(err) => fmt::Display::fmt(err, f),
        }
    }
}

impl From<ReadError> for InvocationError {
    fn from(error: ReadError) -> Self {
        Self::Read(error)
    }
}

impl From<mtp::DeserializeError> for InvocationError {
    fn from(error: mtp::DeserializeError) -> Self {
        Self::Read(error.into())
    }
}

impl From<tl::deserialize::Error> for InvocationError {
    fn from(error: tl::deserialize::Error) -> Self {
        Self::Read(error.into())
    }
}

impl From<Dropped> for InvocationError {
    fn from(_: Dropped) -> Self {
        Self::Dropped
    }
}

impl InvocationError {
    /// [`RpcError::is`], or `false` for anything but an RPC error.
    pub fn is(&self, pattern: &str) -> bool {
        matches!(self, Self::Rpc(rpc) if rpc.is(pattern))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rpc_error(code: i32, message: &str) -> RpcError {
        RpcError::from(tl::mtproto::RpcError {
            error_code: code,
            error_message: message.into(),
        })
    }

    #[test]
    fn numeric_values_are_split_out() {
        let error = rpc_error(400, "CHAT_INVALID");
        assert_eq!((error.name.as_str(), error.value), ("CHAT_INVALID", None));

        let error = rpc_error(420, "FLOOD_WAIT_31");
        assert_eq!((error.name.as_str(), error.value), ("FLOOD_WAIT", Some(31)));

        let error = rpc_error(500, "INTERDC_2_CALL_ERROR");
        assert_eq!(
            (error.name.as_str(), error.value),
            ("INTERDC_CALL_ERROR", Some(2))
        );
        assert_eq!(error.code, 500);
        assert_eq!(error.caused_by, None);
    }

    #[test]
    fn names_match_with_wildcards() {
        let error = rpc_error(303, "PHONE_MIGRATE_4").with_caused_by(0x1234);
        assert!(error.is("PHONE_MIGRATE"));
        assert!(error.is("PHONE_*"));
        assert!(error.is("*_MIGRATE"));
        assert!(!error.is("USER_MIGRATE"));
        assert_eq!(error.caused_by, Some(0x1234));
        assert!(InvocationError::Rpc(error).is("*MIGRATE"));
        assert!(!InvocationError::Timeout.is("*"));
    }
}

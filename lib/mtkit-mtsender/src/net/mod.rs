// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
mod connection;
mod tcp;

pub(crate) use connection::{ConnectionEvent, ConnectionId, TcpConnection, TcpConnectionHandle};
pub use tcp::NetStream;

use mtkit_session::DatacenterAddress;
use std::io;
use std::net::SocketAddr;

/// Represents a socket address which may be proxied.
#[derive(Debug, Clone)]
pub enum ServerAddr {
    /// Socket address whose connection should be proxied.
    #[cfg(feature = "proxy")]
    Proxied { address: SocketAddr, proxy: String },
    /// Socket address for direct connection.
    Tcp { address: SocketAddr },
}

impl ServerAddr {
    /// Look up the datacenter address, going through the proxy if one is given.
    pub async fn resolve(address: &DatacenterAddress, proxy: Option<&str>) -> io::Result<Self> {
        let socket = tokio::net::lookup_host((address.host.as_str(), address.port))
            .await?
            .find(|socket| socket.is_ipv6() == address.ipv6)
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no usable address found for {address}"),
                )
            })?;

        match proxy {
            #[cfg(feature = "proxy")]
            Some(proxy) => Ok(Self::Proxied {
                address: socket,
                proxy: proxy.to_string(),
            }),
            #[cfg(not(feature = "proxy"))]
            Some(_) => Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "a proxy was configured but the `proxy` feature is disabled",
            )),
            None => Ok(Self::Tcp { address: socket }),
        }
    }
}

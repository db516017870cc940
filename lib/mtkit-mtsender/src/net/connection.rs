// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.
use super::{NetStream, ServerAddr};
use crate::errors::ReadError;
use crate::transport::TransactionId;
use bytes::{Buf, BytesMut};
use futures_util::future::{Either, select};
use log::{debug, trace, warn};
use mtkit_crypto::DequeBuffer;
use mtkit_mtproto::transport::{self, Unpacked};
use std::collections::VecDeque;
use std::io;
use std::pin::pin;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

/// The maximum data that we're willing to send or receive at once.
///
/// Telegram will close the connection with roughly a megabyte of data,
/// so to account for the transports' own overhead, we add a few extra
/// kilobytes to the maximum data size.
const MAXIMUM_DATA: usize = (1024 * 1024) + (8 * 1024);

/// How much leading space should be reserved in a buffer to avoid moving memory.
///
/// Enough for the obfuscation header, the transport tag and the length.
const LEADING_BUFFER_SPACE: usize = 64 + 4 + 4;

/// How much room to make for every read.
const READ_CHUNK: usize = 16 * 1024;

/// Identifies one connection among all the ones a transport has opened,
/// so that late events from a dropped connection can be told apart.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct ConnectionId(pub u64);

/// Everything a [`TcpConnection`] reports back to its owner.
#[derive(Debug)]
pub(crate) enum ConnectionEvent {
    Opened,
    /// The connection is gone. `None` if it was closed on request.
    Closed(Option<ReadError>),
    /// A complete packet arrived.
    Received(Vec<u8>),
    /// The server confirmed the receipt of a packet.
    QuickAck(u32),
    /// The transaction was fully written to the socket.
    Sent(TransactionId),
    /// Part of a packet has been read.
    DownloadProgress { buffered: usize },
}

enum Command {
    Send {
        id: TransactionId,
        payload: Vec<u8>,
        quick_ack: bool,
    },
    Close,
}

struct Outgoing {
    id: TransactionId,
    payload: Vec<u8>,
    quick_ack: bool,
}

#[derive(Clone)]
pub(crate) struct TcpConnectionHandle(mpsc::UnboundedSender<Command>);

/// A single socket, framing outgoing payloads and deframing incoming ones.
pub(crate) struct TcpConnection {
    pub runner: TcpConnectionRunner,
    pub handle: TcpConnectionHandle,
}

pub(crate) struct TcpConnectionRunner {
    id: ConnectionId,
    addr: ServerAddr,
    codec: Box<dyn transport::Transport + Send>,
    payload_prefix: Option<Vec<u8>>,
    command_rx: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedSender<(ConnectionId, ConnectionEvent)>,
    queue: VecDeque<Outgoing>,
    writing: Option<TransactionId>,
}

impl TcpConnectionHandle {
    /// Queue a payload to be framed and written. Returns `false` if the
    /// connection is already gone.
    pub fn send(&self, id: TransactionId, payload: Vec<u8>, quick_ack: bool) -> bool {
        self.0
            .send(Command::Send {
                id,
                payload,
                quick_ack,
            })
            .is_ok()
    }

    pub fn close(&self) -> bool {
        self.0.send(Command::Close).is_ok()
    }
}

impl TcpConnection {
    pub fn new(
        id: ConnectionId,
        addr: ServerAddr,
        codec: Box<dyn transport::Transport + Send>,
        payload_prefix: Option<Vec<u8>>,
        events: mpsc::UnboundedSender<(ConnectionId, ConnectionEvent)>,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        Self {
            runner: TcpConnectionRunner {
                id,
                addr,
                codec,
                payload_prefix,
                command_rx,
                events,
                queue: VecDeque::new(),
                writing: None,
            },
            handle: TcpConnectionHandle(command_tx),
        }
    }
}

impl TcpConnectionRunner {
    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send((self.id, event));
    }

    /// Connect and serve the socket until it fails or is closed.
    ///
    /// Exactly one [`ConnectionEvent::Closed`] is emitted at the end.
    pub async fn run(mut self) {
        let connected = {
            let addr = &self.addr;
            let command_rx = &mut self.command_rx;
            let queue = &mut self.queue;
            let connect = pin!(NetStream::connect(addr));
            let closed = pin!(async move {
                while let Some(command) = command_rx.recv().await {
                    match command {
                        Command::Send {
                            id,
                            payload,
                            quick_ack,
                        } => queue.push_back(Outgoing {
                            id,
                            payload,
                            quick_ack,
                        }),
                        Command::Close => break,
                    }
                }
            });
            match select(connect, closed).await {
                Either::Left((result, _)) => Some(result),
                Either::Right(((), _)) => None,
            }
        };

        let mut stream = match connected {
            Some(Ok(stream)) => stream,
            Some(Err(err)) => {
                warn!("failed to connect to {:?}: {}", self.addr, err);
                self.emit(ConnectionEvent::Closed(Some(err.into())));
                return;
            }
            None => {
                debug!("connection {:?} closed before it was opened", self.id);
                self.emit(ConnectionEvent::Closed(None));
                return;
            }
        };

        debug!("connection {:?} opened to {:?}", self.id, self.addr);
        self.emit(ConnectionEvent::Opened);
        let result = self.serve(&mut stream).await;
        if let Err(ref err) = result {
            warn!("connection {:?} failed: {}", self.id, err);
        }
        self.emit(ConnectionEvent::Closed(result.err()));
    }

    async fn serve(&mut self, stream: &mut NetStream) -> Result<(), ReadError> {
        let mut read_buffer = BytesMut::with_capacity(READ_CHUNK);
        let mut write_buffer = DequeBuffer::with_capacity(MAXIMUM_DATA, LEADING_BUFFER_SPACE);
        let mut write_head = 0;
        let mut first_read = true;

        loop {
            self.try_fill_write(&mut write_buffer);
            read_buffer.reserve(READ_CHUNK);

            let (mut reader, mut writer) = stream.split();
            tokio::select! {
                n = reader.read_buf(&mut read_buffer) => {
                    let n = n?;
                    if n == 0 {
                        return Err(ReadError::Io(io::Error::new(
                            io::ErrorKind::ConnectionReset,
                            "read 0 bytes",
                        )));
                    }
                    trace!("read {} bytes from the network", n);
                    if first_read {
                        first_read = false;
                        if read_buffer.starts_with(b"HTTP") {
                            return Err(ReadError::HttpResponse);
                        }
                    }
                    self.on_net_read(&mut read_buffer)?;
                }
                n = writer.write(&write_buffer[write_head..]), if !write_buffer.is_empty() => {
                    write_head += n?;
                    trace!("written {}/{} bytes to the network", write_head, write_buffer.len());
                    if write_head == write_buffer.len() {
                        write_buffer.clear();
                        write_head = 0;
                        if let Some(id) = self.writing.take() {
                            self.emit(ConnectionEvent::Sent(id));
                        }
                    }
                }
                command = self.command_rx.recv() => match command {
                    Some(Command::Send { id, payload, quick_ack }) => {
                        self.queue.push_back(Outgoing { id, payload, quick_ack });
                    }
                    Some(Command::Close) | None => return Ok(()),
                }
            }
        }
    }

    /// Frame the next queued payload, unless a write is already pending.
    fn try_fill_write(&mut self, write_buffer: &mut DequeBuffer<u8>) {
        if !write_buffer.is_empty() {
            return;
        }
        let Some(outgoing) = self.queue.pop_front() else {
            return;
        };

        write_buffer.extend(outgoing.payload.iter().copied());
        self.codec.pack(write_buffer, outgoing.quick_ack);
        if let Some(prefix) = self.payload_prefix.take() {
            write_buffer.extend_front(&prefix);
        }
        self.writing = Some(outgoing.id);
    }

    /// Unpack every complete frame in the buffer, dropping its bytes.
    fn on_net_read(&mut self, read_buffer: &mut BytesMut) -> Result<(), ReadError> {
        if read_buffer.len() > MAXIMUM_DATA {
            return Err(ReadError::Transport(transport::Error::BadLen {
                got: read_buffer.len() as i32,
            }));
        }

        while !read_buffer.is_empty() {
            match self.codec.unpack(&mut read_buffer[..]) {
                Ok(Unpacked::Payload(offset)) => {
                    let payload = read_buffer[offset.data_start..offset.data_end].to_vec();
                    read_buffer.advance(offset.next_offset);
                    self.emit(ConnectionEvent::Received(payload));
                }
                Ok(Unpacked::QuickAck { token, next_offset }) => {
                    read_buffer.advance(next_offset);
                    self.emit(ConnectionEvent::QuickAck(token));
                }
                Err(transport::Error::MissingBytes) => {
                    self.emit(ConnectionEvent::DownloadProgress {
                        buffered: read_buffer.len(),
                    });
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }

        Ok(())
    }
}

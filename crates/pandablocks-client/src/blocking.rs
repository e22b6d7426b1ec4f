//! Blocking client over a `std::net` socket.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use pandablocks_protocol::{execute, Command, ControlCodec, Response, Transport};
use tracing::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Size of the socket read buffer.
const READ_CHUNK: usize = 4096;

/// A client that blocks the calling thread for every round trip.
///
/// A round trip that fails part way (timeout, IO error, hangup, garbled
/// reply) leaves replies unaccounted for, so every later
/// [`send`](Self::send) fails with [`ClientError::ConnectionBroken`].
#[derive(Debug)]
pub struct BlockingClient {
    stream: TcpStream,
    codec: ControlCodec,
    timeout: Duration,
    broken: bool,
}

impl BlockingClient {
    /// Connect to the control port at `host:port`.
    ///
    /// `timeout` bounds both the connection attempt and every later wait for
    /// replies.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> ClientResult<Self> {
        let mut last_err = None;
        for addr in (host, port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(timeout))?;
                    stream.set_nodelay(true)?;
                    debug!("connected to {}", addr);
                    return Ok(BlockingClient {
                        stream,
                        codec: ControlCodec::new(),
                        timeout,
                        broken: false,
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err
            .unwrap_or_else(|| {
                io::Error::new(io::ErrorKind::NotFound, format!("no address for {}", host))
            })
            .into())
    }

    /// Connect using a [`ClientConfig`].
    pub fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        Self::connect(&config.host, config.port, config.timeout())
    }

    /// Whether an earlier round trip failed and the connection must be
    /// dropped.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Run `command` to completion and return its output.
    pub fn send<C: Command>(&mut self, command: C) -> ClientResult<C::Output> {
        if self.broken {
            return Err(ClientError::ConnectionBroken);
        }
        execute(self, command).map_err(ClientError::from)
    }

    /// Close the connection.
    pub fn close(self) -> ClientResult<()> {
        self.stream.shutdown(Shutdown::Both)?;
        Ok(())
    }

    fn fill_buffer(&mut self, buf: &mut [u8]) -> ClientResult<()> {
        match self.stream.read(buf) {
            Ok(0) => Err(ClientError::Disconnected),
            Ok(n) => {
                self.codec.push(&buf[..n]);
                Ok(())
            }
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Err(ClientError::Timeout(self.timeout))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn exchange(&mut self, requests: &[Vec<String>]) -> ClientResult<Vec<Response>> {
        let data = self.codec.encode_batch(requests);
        trace!("sending {} bytes", data.len());
        self.stream.write_all(&data)?;
        self.stream.flush()?;

        let mut responses = Vec::with_capacity(requests.len());
        let mut buf = [0u8; READ_CHUNK];
        while responses.len() < requests.len() {
            match self.codec.decode()? {
                Some(response) => responses.push(response),
                None => self.fill_buffer(&mut buf)?,
            }
        }
        Ok(responses)
    }
}

impl Transport for BlockingClient {
    type Error = ClientError;

    fn round_trip(&mut self, requests: &[Vec<String>]) -> ClientResult<Vec<Response>> {
        if self.broken {
            return Err(ClientError::ConnectionBroken);
        }
        let result = self.exchange(requests);
        if let Err(e) = &result {
            warn!("round trip failed, connection no longer usable: {}", e);
            self.broken = true;
        }
        result
    }
}

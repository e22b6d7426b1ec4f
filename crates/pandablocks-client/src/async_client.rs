//! Tokio client.
//!
//! Steps the same [`Execution`] as the blocking client, with every round
//! trip bounded by the configured timeout.

use std::time::Duration;

use pandablocks_protocol::{Command, ControlCodec, Execution, Next, Response};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::config::ClientConfig;
use crate::error::{ClientError, ClientResult};

/// Size of the socket read buffer.
const READ_CHUNK: usize = 4096;

/// An asynchronous client for the control port.
///
/// Once a round trip fails or is cut short by the timeout, every later
/// [`send`](Self::send) fails with [`ClientError::ConnectionBroken`].
#[derive(Debug)]
pub struct AsyncClient {
    stream: TcpStream,
    codec: ControlCodec,
    timeout: Duration,
    broken: bool,
}

impl AsyncClient {
    /// Connect to the control port at `host:port`.
    pub async fn connect(host: &str, port: u16, limit: Duration) -> ClientResult<Self> {
        let stream = timeout(limit, TcpStream::connect((host, port)))
            .await
            .map_err(|_| ClientError::Timeout(limit))??;
        stream.set_nodelay(true)?;
        debug!("connected to {}:{}", host, port);
        Ok(AsyncClient {
            stream,
            codec: ControlCodec::new(),
            timeout: limit,
            broken: false,
        })
    }

    /// Connect using a [`ClientConfig`].
    pub async fn from_config(config: &ClientConfig) -> ClientResult<Self> {
        Self::connect(&config.host, config.port, config.timeout()).await
    }

    /// Whether an earlier round trip failed and the connection must be
    /// dropped.
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    /// Run `command` to completion and return its output.
    pub async fn send<C: Command>(&mut self, command: C) -> ClientResult<C::Output> {
        let mut execution = Execution::new(command);
        let mut responses = Vec::new();
        loop {
            match execution.step(responses)? {
                Next::Done(output) => return Ok(output),
                Next::Send(requests) => responses = self.round_trip(&requests).await?,
            }
        }
    }

    /// Close the connection.
    pub async fn close(mut self) -> ClientResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    async fn round_trip(&mut self, requests: &[Vec<String>]) -> ClientResult<Vec<Response>> {
        if self.broken {
            return Err(ClientError::ConnectionBroken);
        }
        // Cleared only when every reply has been read, so a round trip
        // dropped part way leaves the connection marked
        self.broken = true;
        let limit = self.timeout;
        let result = match timeout(limit, self.exchange(requests)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(limit)),
        };
        match &result {
            Ok(_) => self.broken = false,
            Err(e) => warn!("round trip failed, connection no longer usable: {}", e),
        }
        result
    }

    async fn exchange(&mut self, requests: &[Vec<String>]) -> ClientResult<Vec<Response>> {
        let data = self.codec.encode_batch(requests);
        trace!("sending {} bytes", data.len());
        self.stream.write_all(&data).await?;
        self.stream.flush().await?;

        let mut responses = Vec::with_capacity(requests.len());
        let mut buf = [0u8; READ_CHUNK];
        while responses.len() < requests.len() {
            match self.codec.decode()? {
                Some(response) => responses.push(response),
                None => match self.stream.read(&mut buf).await? {
                    0 => return Err(ClientError::Disconnected),
                    n => self.codec.push(&buf[..n]),
                },
            }
        }
        Ok(responses)
    }
}

//! Clients for the PandABlocks control port.
//!
//! [`BlockingClient`] and [`AsyncClient`] connect to the control server over
//! TCP and drive [`pandablocks_protocol`] commands to completion:
//!
//! ```rust,ignore
//! use pandablocks_client::BlockingClient;
//! use pandablocks_protocol::{Get, GetState};
//!
//! let mut client = BlockingClient::connect("panda", 8888, Duration::from_secs(10))?;
//! let active = client.send(Get::new("PCAP.ACTIVE"))?;
//! let saved = client.send(GetState::new())?;
//! ```

mod async_client;
mod blocking;
mod config;
mod error;

pub use async_client::AsyncClient;
pub use blocking::BlockingClient;
pub use config::ClientConfig;
pub use error::{ClientError, ClientResult};

//! PandABlocks Control Protocol
//!
//! This crate provides a sans-IO client engine for the line-based control
//! port of a PandABlocks position-capture controller. It knows how to build
//! requests and interpret replies but never touches a socket; transports live
//! in `pandablocks-client`.
//!
//! # Protocol Overview
//!
//! - **Requests** (host → device): newline terminated lines. Queries end in
//!   `?`, assignments use `=`, tables are written as `FIELD<` followed by
//!   value lines and a blank line.
//! - **Replies** (device → host): exactly one per request, either a single
//!   line (`OK`, `OK =value`, `ERR ...`) or a block of `!`-prefixed lines
//!   closed by `.`.
//!
//! # Commands
//!
//! Every operation is a [`Command`]: a resumable state machine that hands
//! out [`Exchange`]s and gets them back filled in. Commands that need
//! several round trips ([`GetFieldInfo`], [`GetState`]) batch their own
//! follow-up queries, and any set of commands can be run together with
//! [`Batch`] or [`join`] so the whole set costs as many round trips as its
//! longest member.
//!
//! # Example
//!
//! ```rust,ignore
//! use pandablocks_protocol::{execute, join, Get, GetFieldInfo};
//!
//! let (active, fields) = execute(
//!     &mut transport,
//!     join((Get::new("PCAP.ACTIVE"), GetFieldInfo::new("SEQ1"))),
//! )?;
//! ```

mod blocks;
mod changes;
mod codec;
mod commands;
mod error;
mod exchange;
mod field_info;
mod responses;
mod scheduler;
mod state;

pub use blocks::*;
pub use changes::*;
pub use codec::*;
pub use commands::{Arm, Command, Disarm, Get, Put, Raw, Step};
pub use error::*;
pub use exchange::*;
pub use field_info::FieldCategory;
pub use responses::*;
pub use scheduler::*;
pub use state::*;

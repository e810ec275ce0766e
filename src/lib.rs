//! Command dispatch core for a sharded Redis-protocol store.
//!
//! Routes commands to the node owning their slot, drives retries and
//! MOVED/ASK redirects, rewrites EVAL into EVALSHA behind a transparent
//! script cache, and fans out multi-node operations with caller-supplied
//! aggregation. Topology, pooling, and the wire codec are injected through
//! the traits in [`manager`] and [`codec`].

pub mod batch;
pub mod codec;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod manager;
pub mod node;
pub mod scatter;
pub mod script;
pub mod utils;
pub mod value;

pub use batch::BatchExecutor;
pub use codec::{Codec, PlainCodec, ReferenceBuilder};
pub use command::{Arg, Command, Convertor};
pub use config::DispatchConfig;
pub use dispatch::Dispatcher;
pub use error::{DispatchError, Result};
pub use manager::{Connection, ConnectionManager};
pub use node::{calc_slot, ClientHandle, Entry, NodeSource, Redirect, RedirectKind, SLOT_COUNT};
pub use scatter::SlotCallback;
pub use value::{BufStats, EncodedBuf, Value};

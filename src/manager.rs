use std::sync::Arc;

use async_trait::async_trait;

use crate::codec::Codec;
use crate::command::{Arg, Command};
use crate::config::DispatchConfig;
use crate::error::Result;
use crate::node::{ClientHandle, Entry, NodeSource};
use crate::value::Value;

/// One live connection to a backend node.
///
/// `execute` writes the command and awaits the decoded reply. Backend error
/// replies come back as `DispatchError::Server`; MOVED/ASK replies may come
/// back either pre-parsed as `DispatchError::Redirect` or as server text,
/// which the executor parses itself.
#[async_trait]
pub trait Connection: Send + Sync {
    fn client(&self) -> ClientHandle;

    async fn execute(
        &self,
        codec: &Arc<dyn Codec>,
        command: &Command,
        args: &[Arg],
    ) -> Result<Value>;
}

/// Topology and pooling collaborator.
///
/// The dispatch core asks it where entries live and for connections resolved
/// from a [`NodeSource`]; replica selection honors `read_only`, a forced
/// client restricts the choice, and a redirect override wins outright. Pool
/// limits are entirely the manager's concern.
#[async_trait]
pub trait ConnectionManager: Send + Sync {
    fn codec(&self) -> Arc<dyn Codec>;

    fn config(&self) -> &DispatchConfig;

    fn is_cluster_mode(&self) -> bool;

    fn entries(&self) -> Vec<Arc<Entry>>;

    fn entry_for_slot(&self, slot: u16) -> Option<Arc<Entry>>;

    fn entry_for_client(&self, client: &ClientHandle) -> Option<Arc<Entry>>;

    /// Slot for a key; non-cluster managers may map everything to slot zero.
    fn calc_slot(&self, key: &[u8]) -> u16;

    async fn connection(
        &self,
        read_only: bool,
        source: &NodeSource,
    ) -> Result<Arc<dyn Connection>>;
}

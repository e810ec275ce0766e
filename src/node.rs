use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::utils::crc16;

pub const SLOT_COUNT: u16 = 16384;

/// Compute the cluster slot for a key: CRC16 over the hash-tag span when
/// braces delimit a non-empty one, otherwise over the whole key, modulo the
/// slot count.
pub fn calc_slot(key: &[u8]) -> u16 {
    crc16(hash_tag_span(key)) % SLOT_COUNT
}

fn hash_tag_span(key: &[u8]) -> &[u8] {
    if let Some(open) = key.iter().position(|&b| b == b'{') {
        if let Some(len) = key[open + 1..].iter().position(|&b| b == b'}') {
            if len > 0 {
                return &key[open + 1..open + 1 + len];
            }
        }
    }
    key
}

/// Address of a single backend node (host:port).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientHandle(Arc<str>);

impl ClientHandle {
    pub fn new(addr: impl Into<String>) -> Self {
        Self(addr.into().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A master plus its replicas. Identity is the master address.
#[derive(Debug, Clone)]
pub struct Entry {
    master: ClientHandle,
    replicas: Vec<ClientHandle>,
}

impl Entry {
    pub fn new(master: ClientHandle, replicas: Vec<ClientHandle>) -> Self {
        Self { master, replicas }
    }

    pub fn master(&self) -> &ClientHandle {
        &self.master
    }

    pub fn replicas(&self) -> &[ClientHandle] {
        &self.replicas
    }

    pub fn is_master(&self, client: &ClientHandle) -> bool {
        &self.master == client
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.master == other.master
    }
}

impl Eq for Entry {}

impl Hash for Entry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.master.hash(state);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectKind {
    Moved,
    Ask,
}

/// A MOVED or ASK reply from the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redirect {
    Moved { slot: u16, target: ClientHandle },
    Ask { target: ClientHandle },
}

impl Redirect {
    pub fn target(&self) -> &ClientHandle {
        match self {
            Redirect::Moved { target, .. } | Redirect::Ask { target } => target,
        }
    }

    pub fn kind(&self) -> RedirectKind {
        match self {
            Redirect::Moved { .. } => RedirectKind::Moved,
            Redirect::Ask { .. } => RedirectKind::Ask,
        }
    }
}

/// Where to send one command.
#[derive(Debug, Clone)]
pub enum NodeSource {
    /// A specific master-replica group.
    Entry(Arc<Entry>),
    /// The group owning this slot.
    Slot(u16),
    /// Slot-scoped but forced onto one client.
    SlotClient(u16, ClientHandle),
    /// A specific client, no slot routing.
    Client(ClientHandle),
    /// Carries a MOVED/ASK override on top of the original source.
    Redirected {
        origin: Box<NodeSource>,
        target: ClientHandle,
        kind: RedirectKind,
    },
}

impl From<Arc<Entry>> for NodeSource {
    fn from(entry: Arc<Entry>) -> Self {
        NodeSource::Entry(entry)
    }
}

impl From<ClientHandle> for NodeSource {
    fn from(client: ClientHandle) -> Self {
        NodeSource::Client(client)
    }
}

impl NodeSource {
    /// Wrap a source with a redirect override. Chained redirects keep the
    /// original, pre-redirect source as the origin.
    pub fn redirected(origin: NodeSource, redirect: &Redirect) -> NodeSource {
        let base = match origin {
            NodeSource::Redirected { origin, .. } => *origin,
            other => other,
        };
        NodeSource::Redirected {
            origin: Box::new(base),
            target: redirect.target().clone(),
            kind: redirect.kind(),
        }
    }

    /// The forced client, when this source carries one.
    pub fn client(&self) -> Option<&ClientHandle> {
        match self {
            NodeSource::SlotClient(_, client) | NodeSource::Client(client) => Some(client),
            NodeSource::Redirected { target, .. } => Some(target),
            NodeSource::Entry(_) | NodeSource::Slot(_) => None,
        }
    }

    /// Pin the source onto `client` unless it already names one. Used by the
    /// script cache to land the retried EVALSHA on the node that just loaded
    /// the script.
    pub fn pin_to_client(&self, client: ClientHandle) -> NodeSource {
        if self.client().is_some() {
            return self.clone();
        }
        match self {
            NodeSource::Slot(slot) => NodeSource::SlotClient(*slot, client),
            _ => NodeSource::Client(client),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_uses_hash_tag_span() {
        assert_eq!(calc_slot(b"user:{42}:profile"), calc_slot(b"42"));
        assert_eq!(calc_slot(b"{a}1"), calc_slot(b"{a}2"));
    }

    #[test]
    fn slot_ignores_empty_hash_tag() {
        assert_eq!(calc_slot(b"{}key"), crc16(b"{}key") % SLOT_COUNT);
    }

    #[test]
    fn slot_of_plain_key_covers_whole_key() {
        assert_eq!(calc_slot(b"plain"), crc16(b"plain") % SLOT_COUNT);
    }

    #[test]
    fn redirect_wrapping_keeps_original_origin() {
        let first = Redirect::Moved {
            slot: 7,
            target: ClientHandle::new("10.0.0.2:6379"),
        };
        let second = Redirect::Ask {
            target: ClientHandle::new("10.0.0.3:6379"),
        };
        let source = NodeSource::redirected(NodeSource::Slot(7), &first);
        let source = NodeSource::redirected(source, &second);
        match source {
            NodeSource::Redirected {
                origin,
                target,
                kind,
            } => {
                assert!(matches!(*origin, NodeSource::Slot(7)));
                assert_eq!(target.as_str(), "10.0.0.3:6379");
                assert_eq!(kind, RedirectKind::Ask);
            }
            other => panic!("expected redirected source, got {:?}", other),
        }
    }

    #[test]
    fn pinning_respects_existing_client() {
        let client = ClientHandle::new("10.0.0.2:6379");
        let other = ClientHandle::new("10.0.0.9:6379");

        let pinned = NodeSource::Slot(11).pin_to_client(client.clone());
        assert!(matches!(pinned, NodeSource::SlotClient(11, ref c) if c == &client));

        let already = NodeSource::Client(other.clone()).pin_to_client(client);
        assert!(matches!(already, NodeSource::Client(ref c) if c == &other));
    }
}

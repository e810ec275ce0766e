use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;

/// Decoded reply value and user-value currency.
///
/// The dispatch core never inspects encoded payloads; decoders hand back a
/// `Value` and convertors reshape it before it reaches the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Text(String),
    Bytes(Bytes),
    List(Vec<Value>),
}

impl Value {
    pub fn text<T: Into<String>>(value: T) -> Self {
        Value::Text(value.into())
    }

    pub fn bytes<T: AsRef<[u8]>>(value: T) -> Self {
        Value::Bytes(Bytes::copy_from_slice(value.as_ref()))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items.as_slice()),
            _ => None,
        }
    }
}

/// Counters for encoded-buffer allocations and releases.
///
/// Codecs may attach one of these to every buffer they produce; release
/// accounting then becomes observable, which the test suite uses to verify
/// that every argument buffer is released exactly once on every dispatch
/// path.
#[derive(Debug, Default)]
pub struct BufStats {
    allocated: AtomicUsize,
    released: AtomicUsize,
}

impl BufStats {
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    /// Buffers currently alive. Zero once every owner has dropped.
    pub fn live(&self) -> usize {
        self.allocated() - self.released()
    }

    fn record_alloc(&self) {
        self.allocated.fetch_add(1, Ordering::SeqCst);
    }

    fn record_release(&self) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// A codec-produced argument buffer with single-owner release semantics.
///
/// There is deliberately no `Clone` impl: the only way to duplicate a buffer
/// is `deep_copy`, which registers a fresh allocation. Release happens on
/// drop, so a double release is unrepresentable and a leak shows up as a
/// non-zero live count on the attached [`BufStats`].
pub struct EncodedBuf {
    bytes: Bytes,
    stats: Option<Arc<BufStats>>,
}

impl EncodedBuf {
    pub fn new(bytes: Bytes) -> Self {
        Self { bytes, stats: None }
    }

    /// Build a buffer whose lifetime is recorded on `stats`.
    pub fn tracked(bytes: Bytes, stats: Arc<BufStats>) -> Self {
        stats.record_alloc();
        Self {
            bytes,
            stats: Some(stats),
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    /// Duplicate the payload into a freshly owned buffer.
    ///
    /// The copy is tracked by the same stats handle as the original, so both
    /// the extra allocation and its eventual release stay visible.
    pub fn deep_copy(&self) -> Self {
        let bytes = Bytes::copy_from_slice(&self.bytes);
        match &self.stats {
            Some(stats) => Self::tracked(bytes, stats.clone()),
            None => Self::new(bytes),
        }
    }
}

impl Drop for EncodedBuf {
    fn drop(&mut self) {
        if let Some(stats) = &self.stats {
            stats.record_release();
        }
    }
}

impl fmt::Debug for EncodedBuf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedBuf")
            .field("len", &self.bytes.len())
            .field("tracked", &self.stats.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracked_buffer_releases_once_on_drop() {
        let stats = Arc::new(BufStats::default());
        let buf = EncodedBuf::tracked(Bytes::from_static(b"payload"), stats.clone());
        assert_eq!(stats.allocated(), 1);
        assert_eq!(stats.live(), 1);
        drop(buf);
        assert_eq!(stats.released(), 1);
        assert_eq!(stats.live(), 0);
    }

    #[test]
    fn deep_copy_registers_new_allocation() {
        let stats = Arc::new(BufStats::default());
        let buf = EncodedBuf::tracked(Bytes::from_static(b"payload"), stats.clone());
        let copy = buf.deep_copy();
        assert_eq!(copy.bytes().as_ref(), b"payload");
        assert_eq!(stats.allocated(), 2);
        drop(buf);
        assert_eq!(stats.live(), 1);
        drop(copy);
        assert_eq!(stats.live(), 0);
    }

    #[test]
    fn untracked_buffer_copies_stay_untracked() {
        let buf = EncodedBuf::new(Bytes::from_static(b"x"));
        let copy = buf.deep_copy();
        assert_eq!(copy.bytes().as_ref(), b"x");
    }
}

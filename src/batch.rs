use std::sync::Arc;

use futures::future::BoxFuture;

use crate::codec::Codec;
use crate::command::{Arg, Command};
use crate::dispatch::Dispatcher;
use crate::error::Result;
use crate::node::Entry;
use crate::value::Value;

/// A batching context: commands queue instead of sending, `execute_async`
/// flushes the queue. Cross-slot batching accepts one of these so a caller
/// that is already inside a batch reuses it; otherwise the core creates a
/// transient direct context per entry.
///
/// Methods return boxed futures rather than being `async fn`s so an
/// implementation can enqueue synchronously at call time and hand back a
/// future that resolves once the flush completes.
pub trait BatchExecutor: Send + Sync {
    fn read_entry_async(
        &self,
        entry: Arc<Entry>,
        codec: Arc<dyn Codec>,
        command: Command,
        args: Vec<Arg>,
    ) -> BoxFuture<'static, Result<Value>>;

    fn write_entry_async(
        &self,
        entry: Arc<Entry>,
        codec: Arc<dyn Codec>,
        command: Command,
        args: Vec<Arg>,
    ) -> BoxFuture<'static, Result<Value>>;

    fn execute_async(&self) -> BoxFuture<'static, Result<()>>;
}

/// Degenerate batch context that sends immediately; flushing is a no-op.
pub(crate) struct DirectBatch {
    dispatcher: Dispatcher,
}

impl DirectBatch {
    pub(crate) fn new(dispatcher: Dispatcher) -> Self {
        Self { dispatcher }
    }
}

impl BatchExecutor for DirectBatch {
    fn read_entry_async(
        &self,
        entry: Arc<Entry>,
        codec: Arc<dyn Codec>,
        command: Command,
        args: Vec<Arg>,
    ) -> BoxFuture<'static, Result<Value>> {
        let dispatcher = self.dispatcher.clone();
        Box::pin(async move { dispatcher.read_source_async(entry, codec, command, args).await })
    }

    fn write_entry_async(
        &self,
        entry: Arc<Entry>,
        codec: Arc<dyn Codec>,
        command: Command,
        args: Vec<Arg>,
    ) -> BoxFuture<'static, Result<Value>> {
        let dispatcher = self.dispatcher.clone();
        Box::pin(async move { dispatcher.write_source_async(entry, codec, command, args).await })
    }

    fn execute_async(&self) -> BoxFuture<'static, Result<()>> {
        Box::pin(async { Ok(()) })
    }
}

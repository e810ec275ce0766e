//! The facade callers use: read/write/eval dispatch, the blocking-poll
//! emulator, and the synchronous bridges. Every method is a thin reduction
//! onto the command executor via the right [`NodeSource`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{sleep, timeout};
use tracing::debug;

use crate::codec::{Codec, PlainCodec, ReferenceBuilder};
use crate::command::{deep_copy_args, script_load, Arg, Command};
use crate::error::{DispatchError, Result};
use crate::executor::CommandExecutor;
use crate::manager::ConnectionManager;
use crate::node::{ClientHandle, NodeSource};
use crate::script::script_digest;
use crate::value::{EncodedBuf, Value};

#[derive(Clone)]
pub struct Dispatcher {
    manager: Arc<dyn ConnectionManager>,
    reference_builder: Option<Arc<dyn ReferenceBuilder>>,
    runtime: Handle,
}

impl Dispatcher {
    /// Build a dispatcher on the current runtime. Panics outside of an async
    /// runtime context; use [`Dispatcher::with_runtime`] there.
    pub fn new(manager: Arc<dyn ConnectionManager>) -> Self {
        Self::with_runtime(manager, Handle::current())
    }

    pub fn with_runtime(manager: Arc<dyn ConnectionManager>, runtime: Handle) -> Self {
        Self {
            manager,
            reference_builder: None,
            runtime,
        }
    }

    pub fn with_reference_builder(mut self, builder: Arc<dyn ReferenceBuilder>) -> Self {
        self.reference_builder = Some(builder);
        self
    }

    pub fn manager(&self) -> &Arc<dyn ConnectionManager> {
        &self.manager
    }

    /// Slot-routed source for a key. A missing key resolves to the default
    /// master; the cluster scatter paths never pass one.
    pub fn source_for_key(&self, key: Option<&str>) -> NodeSource {
        self.source_for_bytes(key.map(str::as_bytes))
    }

    pub fn source_for_bytes(&self, key: Option<&[u8]>) -> NodeSource {
        match key {
            Some(key) => NodeSource::Slot(self.manager.calc_slot(key)),
            None => NodeSource::Slot(0),
        }
    }

    /// Encode a user value, substituting a persistent reference when a
    /// reference builder is configured and applies. Ownership of the buffer
    /// transfers to the caller; failures surface as invalid-argument.
    pub fn encode(&self, codec: &Arc<dyn Codec>, value: &Value) -> Result<EncodedBuf> {
        self.encode_with(value, |value| codec.encode_value(value))
    }

    pub fn encode_map_key(&self, codec: &Arc<dyn Codec>, value: &Value) -> Result<EncodedBuf> {
        self.encode_with(value, |value| codec.encode_map_key(value))
    }

    pub fn encode_map_value(&self, codec: &Arc<dyn Codec>, value: &Value) -> Result<EncodedBuf> {
        self.encode_with(value, |value| codec.encode_map_value(value))
    }

    fn encode_with(
        &self,
        value: &Value,
        encode: impl FnOnce(&Value) -> Result<EncodedBuf>,
    ) -> Result<EncodedBuf> {
        let reference = self
            .reference_builder
            .as_ref()
            .and_then(|builder| builder.to_reference(value));
        encode(reference.as_ref().unwrap_or(value)).map_err(|err| match err {
            err @ DispatchError::InvalidArgument(_) => err,
            other => DispatchError::InvalidArgument(other.to_string()),
        })
    }

    /// Submit one command through the retry driver. All facade methods reduce
    /// to this.
    #[allow(clippy::too_many_arguments)]
    pub async fn execute(
        &self,
        read_only: bool,
        source: NodeSource,
        codec: Arc<dyn Codec>,
        command: Command,
        args: Vec<Arg>,
        ignore_redirect: bool,
        no_retry: bool,
    ) -> Result<Value> {
        CommandExecutor::new(
            self.manager.clone(),
            read_only,
            source,
            codec,
            command,
            args,
            ignore_redirect,
            no_retry,
        )
        .execute()
        .await
    }

    // --- read/write surface ---

    /// Read routed by key; string and binary keys both apply.
    pub async fn read_async(
        &self,
        key: impl AsRef<[u8]>,
        codec: Arc<dyn Codec>,
        command: Command,
        args: Vec<Arg>,
    ) -> Result<Value> {
        let source = self.source_for_bytes(Some(key.as_ref()));
        self.execute(true, source, codec, command, args, false, false).await
    }

    /// Read against an explicit source: an entry handle, a forced client, or
    /// a prebuilt [`NodeSource`].
    pub async fn read_source_async(
        &self,
        source: impl Into<NodeSource>,
        codec: Arc<dyn Codec>,
        command: Command,
        args: Vec<Arg>,
    ) -> Result<Value> {
        self.execute(true, source.into(), codec, command, args, false, false).await
    }

    /// Write routed by key; writes always land on the master.
    pub async fn write_async(
        &self,
        key: impl AsRef<[u8]>,
        codec: Arc<dyn Codec>,
        command: Command,
        args: Vec<Arg>,
    ) -> Result<Value> {
        let source = self.source_for_bytes(Some(key.as_ref()));
        self.execute(false, source, codec, command, args, false, false).await
    }

    /// Write against an explicit source; an entry lands on its master.
    pub async fn write_source_async(
        &self,
        source: impl Into<NodeSource>,
        codec: Arc<dyn Codec>,
        command: Command,
        args: Vec<Arg>,
    ) -> Result<Value> {
        self.execute(false, source.into(), codec, command, args, false, false).await
    }

    /// Write routed through the entry owning `client`.
    pub async fn write_client_async(
        &self,
        client: &ClientHandle,
        codec: Arc<dyn Codec>,
        command: Command,
        args: Vec<Arg>,
    ) -> Result<Value> {
        let entry = self
            .manager
            .entry_for_client(client)
            .ok_or_else(|| DispatchError::Connection(format!("no entry for client {}", client)))?;
        self.write_source_async(entry, codec, command, args).await
    }

    // --- eval surface ---

    pub async fn eval_read_async(
        &self,
        key: &str,
        codec: Arc<dyn Codec>,
        command: Command,
        script: &str,
        keys: &[String],
        params: Vec<Arg>,
    ) -> Result<Value> {
        let source = self.source_for_key(Some(key));
        self.eval_source_async(true, source, codec, command, script, keys, false, params)
            .await
    }

    pub async fn eval_write_async(
        &self,
        key: &str,
        codec: Arc<dyn Codec>,
        command: Command,
        script: &str,
        keys: &[String],
        params: Vec<Arg>,
    ) -> Result<Value> {
        let source = self.source_for_key(Some(key));
        self.eval_source_async(false, source, codec, command, script, keys, false, params)
            .await
    }

    pub async fn eval_write_no_retry_async(
        &self,
        key: &str,
        codec: Arc<dyn Codec>,
        command: Command,
        script: &str,
        keys: &[String],
        params: Vec<Arg>,
    ) -> Result<Value> {
        let source = self.source_for_key(Some(key));
        self.eval_source_async(false, source, codec, command, script, keys, true, params)
            .await
    }

    /// Eval dispatch against an explicit source: an entry handle, a forced
    /// client, or a precomputed slot. With the script cache active and an
    /// EVAL command, the EVALSHA-first flow applies.
    #[allow(clippy::too_many_arguments)]
    pub async fn eval_source_async(
        &self,
        read_only: bool,
        source: NodeSource,
        codec: Arc<dyn Codec>,
        command: Command,
        script: &str,
        keys: &[String],
        no_retry: bool,
        params: Vec<Arg>,
    ) -> Result<Value> {
        if self.manager.config().use_script_cache && command.name() == "EVAL" {
            return self
                .eval_cached(read_only, source, codec, command, script, keys, no_retry, params)
                .await;
        }
        let args = script_args(Arg::raw(script), keys, params);
        self.execute(read_only, source, codec, command, args, false, no_retry).await
    }

    /// EVALSHA-first flow. `pps` holds deep copies of the value buffers so a
    /// NOSCRIPT fallback can rebuild the argument list after the first
    /// attempt has consumed its copies; it is released exactly once on every
    /// path out of this function.
    #[allow(clippy::too_many_arguments)]
    async fn eval_cached(
        &self,
        read_only: bool,
        source: NodeSource,
        codec: Arc<dyn Codec>,
        command: Command,
        script: &str,
        keys: &[String],
        no_retry: bool,
        params: Vec<Arg>,
    ) -> Result<Value> {
        let pps = deep_copy_args(&params);
        let sha = script_digest(script);
        let evalsha = command.with_name("EVALSHA");
        let args = script_args(Arg::raw(&sha), keys, params);

        // first attempt runs with retries disabled so NOSCRIPT is classified
        // immediately
        let executor = CommandExecutor::new(
            self.manager.clone(),
            read_only,
            source.clone(),
            codec.clone(),
            evalsha.clone(),
            args,
            false,
            true,
        );
        let (result, used_client) = executor.execute_with_client().await;

        match result {
            Ok(value) => Ok(value),
            Err(err) if err.is_noscript() => {
                let client = used_client.ok_or_else(|| {
                    DispatchError::Unexpected(anyhow::anyhow!(
                        "script missing but no client recorded for the attempt"
                    ))
                })?;
                debug!(node = %client, "script not cached on node, issuing SCRIPT LOAD");
                self.load_script(&client, script).await?;

                let args = script_args(Arg::raw(&sha), keys, pps);
                let pinned = source.pin_to_client(client);
                self.execute(read_only, pinned, codec, evalsha, args, false, no_retry)
                    .await
            }
            Err(err) => Err(err),
        }
    }

    /// Register a script on the node that just reported NOSCRIPT: write when
    /// the client is its entry's master, read pinned to the client otherwise.
    async fn load_script(&self, client: &ClientHandle, script: &str) -> Result<Value> {
        let codec: Arc<dyn Codec> = Arc::new(PlainCodec);
        let args = vec![Arg::raw(script)];
        let entry = self
            .manager
            .entry_for_client(client)
            .ok_or_else(|| DispatchError::Connection(format!("no entry for client {}", client)))?;
        if entry.is_master(client) {
            self.write_source_async(entry, codec, script_load(), args).await
        } else {
            self.read_source_async(client.clone(), codec, script_load(), args)
                .await
        }
    }

    // --- blocking poll emulation ---

    /// Blocking pop across several queues. Outside cluster mode the native
    /// multi-key blocking command handles it in one round trip; on a cluster
    /// the queues may span slots, so emulate by rotating immediate pops with
    /// a shared seconds budget. A zero timeout polls indefinitely, matching
    /// the backend's blocking convention.
    pub async fn poll_from_any_async(
        &self,
        name: &str,
        codec: Arc<dyn Codec>,
        command: Command,
        seconds_timeout: u64,
        queue_names: &[&str],
    ) -> Result<Value> {
        if self.manager.is_cluster_mode() && !queue_names.is_empty() {
            return self
                .poll_rotating(name, codec, command, seconds_timeout, queue_names)
                .await;
        }
        let mut args = Vec::with_capacity(queue_names.len() + 2);
        args.push(Arg::raw(name));
        args.extend(queue_names.iter().map(Arg::raw));
        args.push(Arg::Int(seconds_timeout as i64));
        self.write_async(name, codec, command, args).await
    }

    async fn poll_rotating(
        &self,
        name: &str,
        codec: Arc<dyn Codec>,
        command: Command,
        seconds_timeout: u64,
        queue_names: &[&str],
    ) -> Result<Value> {
        let immediate = command.nonblocking_variant().ok_or_else(|| {
            DispatchError::InvalidArgument(format!(
                "command {} has no non-blocking variant",
                command.name()
            ))
        })?;
        let mut names = Vec::with_capacity(queue_names.len() + 1);
        names.push(name.to_string());
        names.extend(queue_names.iter().map(|queue| queue.to_string()));

        // The budget ticks down once per rotation position with one-second
        // pacing, so the caller's timeout is a bound, not a deadline.
        let unbounded = seconds_timeout == 0;
        let mut remaining = seconds_timeout;
        loop {
            for queue in &names {
                let args = vec![Arg::raw(queue), Arg::Int(1)];
                let value = self
                    .write_async(queue, codec.clone(), immediate.clone(), args)
                    .await?;
                if !value.is_null() {
                    return Ok(value);
                }
                if !unbounded {
                    remaining -= 1;
                    if remaining == 0 {
                        return Ok(Value::Null);
                    }
                }
                sleep(Duration::from_secs(1)).await;
            }
        }
    }

    // --- synchronous bridges ---

    /// Await a dispatch future from synchronous code. Refuses to run on a
    /// runtime worker thread, where blocking would deadlock the transport.
    pub fn sync_get<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.guard_sync_entry()?;
        self.runtime.block_on(future)
    }

    /// Await a subscription future under the dedicated subscription budget.
    pub fn sync_subscription<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.guard_sync_entry()?;
        self.runtime.block_on(self.await_subscription(future))
    }

    /// Async form of the subscription bridge: the future must complete within
    /// `timeout + retry_interval * retry_attempts` or the operation fails
    /// with the subscribe-timeout guidance.
    pub async fn await_subscription<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let config = self.manager.config();
        match timeout(config.subscription_timeout(), future).await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::SubscribeTimeout {
                budget_ms: config.subscription_timeout_ms(),
            }),
        }
    }

    fn guard_sync_entry(&self) -> Result<()> {
        if Handle::try_current().is_ok() {
            return Err(DispatchError::IllegalState(
                "sync bridge invoked from an async runtime worker; await the future instead"
                    .into(),
            ));
        }
        Ok(())
    }
}

/// `[script-or-sha, key-count, keys.., params..]`
fn script_args(script_arg: Arg, keys: &[String], params: Vec<Arg>) -> Vec<Arg> {
    let mut args = Vec::with_capacity(2 + keys.len() + params.len());
    args.push(script_arg);
    args.push(Arg::Int(keys.len() as i64));
    args.extend(keys.iter().map(Arg::raw));
    args.extend(params);
    args
}

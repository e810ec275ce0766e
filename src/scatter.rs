//! Multi-node dispatch: all-nodes fan-out, random-sequential reads, and
//! cross-slot batched execution.

use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use hashbrown::HashMap;
use rand::seq::SliceRandom;
use rand::thread_rng;

use crate::batch::{BatchExecutor, DirectBatch};
use crate::codec::Codec;
use crate::command::{deep_copy_args, Arg, Command};
use crate::dispatch::Dispatcher;
use crate::error::{DispatchError, Result};
use crate::executor::CommandExecutor;
use crate::node::{Entry, NodeSource};
use crate::value::Value;

/// Caller-supplied reducer over per-node or per-slot partial results.
///
/// `on_slot_result` and `on_finish` take `&mut self`: the core drives every
/// aggregation from a single task, so the exclusive borrow is the critical
/// section and distinct-node interleavings cannot race the accumulator.
/// `create_command` and `create_params` only participate in cross-slot
/// batching, where each slot group may need its own command variant and
/// argument list; the defaults keep the original command and pass the group's
/// keys through as arguments.
pub trait SlotCallback: Send {
    type Output;

    fn create_command(&self, keys: &[String]) -> Option<Command> {
        let _ = keys;
        None
    }

    fn create_params(&self, keys: &[String]) -> Vec<Arg> {
        keys.iter().map(Arg::raw).collect()
    }

    fn on_slot_result(&mut self, value: Value);

    fn on_finish(&mut self) -> Self::Output;
}

impl Dispatcher {
    // --- all-nodes fan-out ---

    /// Read from every entry and collect the per-node results, flattening
    /// list replies. A redirect mid-fan-out contributes a null result; the
    /// first real error fails the call once every node has terminated.
    pub async fn read_all_async(
        &self,
        codec: Arc<dyn Codec>,
        command: Command,
        params: Vec<Arg>,
    ) -> Result<Vec<Value>> {
        let outcomes = self.fan_out_entries(true, codec, &command, params).await;
        let mut results = Vec::new();
        for outcome in outcomes {
            match outcome {
                Ok(Value::List(items)) => results.extend(items),
                Ok(value) => results.push(value),
                Err(DispatchError::Redirect(_)) => results.push(Value::Null),
                Err(err) => return Err(err),
            }
        }
        Ok(results)
    }

    pub async fn read_all_with_async<C: SlotCallback>(
        &self,
        codec: Arc<dyn Codec>,
        command: Command,
        callback: C,
        params: Vec<Arg>,
    ) -> Result<C::Output> {
        self.all_with(true, codec, command, callback, params, true)
            .await
    }

    /// Write to every entry, ignoring per-node results.
    pub async fn write_all_async(
        &self,
        codec: Arc<dyn Codec>,
        command: Command,
        params: Vec<Arg>,
    ) -> Result<()> {
        let outcomes = self.fan_out_entries(false, codec, &command, params).await;
        for outcome in outcomes {
            match outcome {
                Ok(_) | Err(DispatchError::Redirect(_)) => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    pub async fn write_all_with_async<C: SlotCallback>(
        &self,
        codec: Arc<dyn Codec>,
        command: Command,
        callback: C,
        params: Vec<Arg>,
    ) -> Result<C::Output> {
        self.all_with(false, codec, command, callback, params, true)
            .await
    }

    /// Run a script on every entry. The script text is sent verbatim; the
    /// EVALSHA rewrite only applies to single-node eval dispatch.
    pub async fn eval_write_all_async<C: SlotCallback>(
        &self,
        command: Command,
        callback: C,
        script: &str,
        keys: &[String],
        params: Vec<Arg>,
    ) -> Result<C::Output> {
        let mut args = Vec::with_capacity(2 + keys.len() + params.len());
        args.push(Arg::raw(script));
        args.push(Arg::Int(keys.len() as i64));
        args.extend(keys.iter().map(Arg::raw));
        args.extend(params);
        let codec = self.manager().codec();
        self.all_with(false, codec, command, callback, args, false)
            .await
    }

    async fn all_with<C: SlotCallback>(
        &self,
        read_only: bool,
        codec: Arc<dyn Codec>,
        command: Command,
        mut callback: C,
        params: Vec<Arg>,
        convert_on_redirect: bool,
    ) -> Result<C::Output> {
        let outcomes = self.fan_out_entries(read_only, codec, &command, params).await;
        let mut first_error = None;
        for outcome in outcomes {
            match outcome {
                Ok(value) => callback.on_slot_result(value),
                Err(DispatchError::Redirect(_)) => {
                    // the redirect response is assumed to still carry the
                    // intended value, so the convertor is reapplied to it
                    let value = if convert_on_redirect {
                        command.convert(Value::Null)
                    } else {
                        Value::Null
                    };
                    callback.on_slot_result(value);
                }
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(callback.on_finish()),
        }
    }

    /// One attempt per entry, redirects surfaced rather than followed.
    /// Outcomes arrive in completion order, and all attempts have terminated
    /// before this returns.
    async fn fan_out_entries(
        &self,
        read_only: bool,
        codec: Arc<dyn Codec>,
        command: &Command,
        params: Vec<Arg>,
    ) -> Vec<Result<Value>> {
        let mut tasks = FuturesUnordered::new();
        for entry in self.manager().entries() {
            let attempt = self.entry_attempt(read_only, entry, &codec, command, &params, true);
            tasks.push(attempt.execute());
        }
        let mut outcomes = Vec::new();
        while let Some(result) = tasks.next().await {
            outcomes.push(result);
        }
        outcomes
    }

    /// One executor per entry, over a deep copy of the argument list so
    /// buffer ownership stays exactly-once per attempt.
    fn entry_attempt(
        &self,
        read_only: bool,
        entry: Arc<Entry>,
        codec: &Arc<dyn Codec>,
        command: &Command,
        params: &[Arg],
        ignore_redirect: bool,
    ) -> CommandExecutor {
        CommandExecutor::new(
            self.manager().clone(),
            read_only,
            NodeSource::Entry(entry),
            codec.clone(),
            command.clone(),
            deep_copy_args(params),
            ignore_redirect,
            false,
        )
    }

    // --- random-sequential ---

    /// Try entries in shuffled order until one yields a non-null value. A
    /// null advances, an error fails immediately, exhaustion completes null.
    pub async fn read_random_async(
        &self,
        codec: Arc<dyn Codec>,
        command: Command,
        params: Vec<Arg>,
    ) -> Result<Value> {
        let mut entries = self.manager().entries();
        entries.shuffle(&mut thread_rng());
        for entry in entries {
            let attempt = self.entry_attempt(true, entry, &codec, &command, &params, false);
            match attempt.execute().await {
                Ok(Value::Null) => continue,
                other => return other,
            }
        }
        Ok(Value::Null)
    }

    // --- cross-slot batched ---

    pub async fn read_batched_async<C: SlotCallback>(
        &self,
        codec: Arc<dyn Codec>,
        command: Command,
        callback: C,
        keys: &[String],
        batch: Option<Arc<dyn BatchExecutor>>,
    ) -> Result<C::Output> {
        self.execute_batched(true, codec, command, callback, keys, None, batch)
            .await
    }

    /// Batched write. When `value_map` is supplied, arguments interleave
    /// `[key, value, ...]` per slot group in the caller-provided key order;
    /// otherwise the callback produces each group's parameters.
    pub async fn write_batched_async<C: SlotCallback>(
        &self,
        codec: Arc<dyn Codec>,
        command: Command,
        callback: C,
        keys: &[String],
        value_map: Option<&HashMap<String, Value>>,
        batch: Option<Arc<dyn BatchExecutor>>,
    ) -> Result<C::Output> {
        self.execute_batched(false, codec, command, callback, keys, value_map, batch)
            .await
    }

    /// Multi-key dispatch that respects slot boundaries. Outside cluster mode
    /// everything collapses into one command. On a cluster, keys group by
    /// owning entry and then by slot (multi-key commands whose keys span
    /// slots draw a CROSSLOT error from the backend); each group goes through
    /// a batch context so same-entry groups can pipeline, and the call
    /// completes only after every group has terminated, surfacing the first
    /// recorded error.
    #[allow(clippy::too_many_arguments)]
    async fn execute_batched<C: SlotCallback>(
        &self,
        read_only: bool,
        codec: Arc<dyn Codec>,
        command: Command,
        mut callback: C,
        keys: &[String],
        value_map: Option<&HashMap<String, Value>>,
        batch: Option<Arc<dyn BatchExecutor>>,
    ) -> Result<C::Output> {
        if !self.manager().is_cluster_mode() {
            let params = match value_map {
                Some(map) => self.interleave_params(&codec, keys, map)?,
                None => keys.iter().map(Arg::raw).collect(),
            };
            let source = self.source_for_key(None);
            let value = self
                .execute(read_only, source, codec, command, params, false, false)
                .await?;
            if !value.is_null() {
                callback.on_slot_result(value);
            }
            return Ok(callback.on_finish());
        }

        let mut groups: HashMap<Arc<Entry>, HashMap<u16, Vec<String>>> = HashMap::new();
        for key in keys {
            let slot = self.manager().calc_slot(key.as_bytes());
            let entry = self.manager().entry_for_slot(slot).ok_or_else(|| {
                DispatchError::Connection(format!("slot {} not covered by any entry", slot))
            })?;
            groups
                .entry(entry)
                .or_default()
                .entry(slot)
                .or_default()
                .push(key.clone());
        }

        let mut tasks = FuturesUnordered::new();
        let mut first_error: Option<DispatchError> = None;
        for (entry, slots) in groups {
            let executor: Arc<dyn BatchExecutor> = match &batch {
                Some(context) => context.clone(),
                None => Arc::new(DirectBatch::new(self.clone())),
            };
            for (_slot, grouped) in slots {
                let group_command = callback
                    .create_command(&grouped)
                    .unwrap_or_else(|| command.clone());
                let params = match value_map {
                    Some(map) => self.interleave_params(&codec, &grouped, map)?,
                    None => callback.create_params(&grouped),
                };
                let future = if read_only {
                    executor.read_entry_async(entry.clone(), codec.clone(), group_command, params)
                } else {
                    executor.write_entry_async(entry.clone(), codec.clone(), group_command, params)
                };
                tasks.push(future);
            }
            if batch.is_none() {
                if let Err(err) = executor.execute_async().await {
                    first_error.get_or_insert(err);
                }
            }
        }

        while let Some(result) = tasks.next().await {
            match result {
                Ok(value) => {
                    if !value.is_null() {
                        callback.on_slot_result(value);
                    }
                }
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(callback.on_finish()),
        }
    }

    fn interleave_params(
        &self,
        codec: &Arc<dyn Codec>,
        keys: &[String],
        value_map: &HashMap<String, Value>,
    ) -> Result<Vec<Arg>> {
        let mut params = Vec::with_capacity(keys.len() * 2);
        for key in keys {
            let value = value_map.get(key).ok_or_else(|| {
                DispatchError::InvalidArgument(format!("no value supplied for key '{}'", key))
            })?;
            params.push(Arg::raw(key));
            params.push(Arg::Buf(self.encode(codec, value)?));
        }
        Ok(params)
    }
}

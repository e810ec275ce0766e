use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;

use crate::value::{EncodedBuf, Value};

/// Reshapes a decoded reply before it reaches the caller.
pub type Convertor = Arc<dyn Fn(Value) -> Value + Send + Sync>;

/// Immutable command descriptor: the wire name plus an optional result
/// convertor. A multi-word name ("SCRIPT LOAD") stands for a command with a
/// subcommand; transports split it into tokens.
#[derive(Clone)]
pub struct Command {
    name: Cow<'static, str>,
    convertor: Option<Convertor>,
}

impl Command {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            convertor: None,
        }
    }

    pub fn with_convertor<F>(mut self, convertor: F) -> Self
    where
        F: Fn(Value) -> Value + Send + Sync + 'static,
    {
        self.convertor = Some(Arc::new(convertor));
        self
    }

    /// A variant of this command under a different wire name, keeping the
    /// convertor. This is how EVAL becomes EVALSHA.
    pub fn with_name(&self, name: impl Into<Cow<'static, str>>) -> Self {
        Self {
            name: name.into(),
            convertor: self.convertor.clone(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn convert(&self, value: Value) -> Value {
        match &self.convertor {
            Some(convertor) => convertor(value),
            None => value,
        }
    }

    /// The immediate form of a blocking pop, used by the cluster poll
    /// emulator. `None` for commands without one.
    pub fn nonblocking_variant(&self) -> Option<Command> {
        let name = match self.name.to_ascii_uppercase().as_str() {
            "BLPOP" => "LPOP",
            "BRPOP" => "RPOP",
            "BZPOPMIN" => "ZPOPMIN",
            "BZPOPMAX" => "ZPOPMAX",
            _ => return None,
        };
        Some(self.with_name(name))
    }
}

impl fmt::Debug for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Command")
            .field("name", &self.name)
            .field("convertor", &self.convertor.is_some())
            .finish()
    }
}

/// Commands the dispatch core issues on its own behalf.
pub fn asking() -> Command {
    Command::new("ASKING")
}

pub fn script_load() -> Command {
    Command::new("SCRIPT LOAD")
}

/// One outbound command argument.
#[derive(Debug)]
pub enum Arg {
    /// Keys and literal tokens.
    Raw(Bytes),
    /// Counts and timeouts, rendered in decimal.
    Int(i64),
    /// A codec-produced value buffer whose release is owned by the dispatch
    /// path it is handed to.
    Buf(EncodedBuf),
}

impl Arg {
    pub fn raw(data: impl AsRef<[u8]>) -> Self {
        Arg::Raw(Bytes::copy_from_slice(data.as_ref()))
    }

    /// Wire rendering, used by transports and test fakes.
    pub fn to_bytes(&self) -> Bytes {
        match self {
            Arg::Raw(bytes) => bytes.clone(),
            Arg::Int(value) => Bytes::from(value.to_string().into_bytes()),
            Arg::Buf(buf) => buf.bytes().clone(),
        }
    }

    pub fn deep_copy(&self) -> Self {
        match self {
            Arg::Raw(bytes) => Arg::Raw(bytes.clone()),
            Arg::Int(value) => Arg::Int(*value),
            Arg::Buf(buf) => Arg::Buf(buf.deep_copy()),
        }
    }
}

/// Duplicate an argument list, deep-copying every value buffer so the copy
/// can outlive the original's release.
pub fn deep_copy_args(args: &[Arg]) -> Vec<Arg> {
    args.iter().map(Arg::deep_copy).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renamed_variant_keeps_convertor() {
        let command = Command::new("EVAL").with_convertor(|value| match value {
            Value::Int(n) => Value::Int(n + 1),
            other => other,
        });
        let variant = command.with_name("EVALSHA");
        assert_eq!(variant.name(), "EVALSHA");
        assert_eq!(variant.convert(Value::Int(41)), Value::Int(42));
    }

    #[test]
    fn blocking_pops_map_to_immediate_forms() {
        assert_eq!(
            Command::new("BLPOP").nonblocking_variant().map(|c| c.name().to_string()),
            Some("LPOP".to_string())
        );
        assert_eq!(
            Command::new("BZPOPMAX").nonblocking_variant().map(|c| c.name().to_string()),
            Some("ZPOPMAX".to_string())
        );
        assert!(Command::new("GET").nonblocking_variant().is_none());
    }

    #[test]
    fn int_args_render_in_decimal() {
        assert_eq!(Arg::Int(17).to_bytes().as_ref(), b"17");
        assert_eq!(Arg::raw("key").to_bytes().as_ref(), b"key");
    }
}

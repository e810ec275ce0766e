use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tracing::{debug, warn};

use crate::codec::Codec;
use crate::command::{self, Arg, Command};
use crate::error::{DispatchError, Result};
use crate::manager::ConnectionManager;
use crate::node::{ClientHandle, NodeSource, Redirect, RedirectKind};
use crate::value::Value;

/// Classification of one attempt, as reported by the single-attempt executor
/// to the retry driver.
enum AttemptOutcome {
    Success(Value),
    Redirect(Redirect),
    Retriable(DispatchError),
    TimedOut,
    Fatal(DispatchError),
}

/// Drives one command to completion: issues attempts, classifies their
/// outcomes, follows redirects, and sleeps between retries on the runtime
/// timer. Owns the argument list; every buffer in it is released exactly once
/// when the executor finishes, whatever the outcome.
pub struct CommandExecutor {
    manager: Arc<dyn ConnectionManager>,
    read_only: bool,
    source: NodeSource,
    codec: Arc<dyn Codec>,
    command: Command,
    args: Vec<Arg>,
    ignore_redirect: bool,
    no_retry: bool,
    last_client: Option<ClientHandle>,
}

impl CommandExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        manager: Arc<dyn ConnectionManager>,
        read_only: bool,
        source: NodeSource,
        codec: Arc<dyn Codec>,
        command: Command,
        args: Vec<Arg>,
        ignore_redirect: bool,
        no_retry: bool,
    ) -> Self {
        Self {
            manager,
            read_only,
            source,
            codec,
            command,
            args,
            ignore_redirect,
            no_retry,
            last_client: None,
        }
    }

    pub async fn execute(self) -> Result<Value> {
        self.execute_with_client().await.0
    }

    /// Run the command and also report which client served the final attempt.
    /// The script cache needs the client to target SCRIPT LOAD.
    pub async fn execute_with_client(mut self) -> (Result<Value>, Option<ClientHandle>) {
        let result = self.run().await;
        (result, self.last_client.take())
    }

    async fn run(&mut self) -> Result<Value> {
        let (attempt_timeout, retry_attempts, retry_interval) = {
            let config = self.manager.config();
            (
                config.timeout(),
                config.retry_attempts,
                config.retry_interval(),
            )
        };

        let mut attempts_left = retry_attempts;
        let mut attempts_made: u32 = 0;

        loop {
            attempts_made += 1;
            let outcome = self.attempt(attempt_timeout).await;
            let cause = match outcome {
                AttemptOutcome::Success(value) => return Ok(self.command.convert(value)),
                AttemptOutcome::Fatal(err) => return Err(err),
                AttemptOutcome::Redirect(redirect) => {
                    if self.ignore_redirect {
                        return Err(DispatchError::Redirect(redirect));
                    }
                    debug!(
                        command = %self.command.name(),
                        target = %redirect.target(),
                        kind = ?redirect.kind(),
                        "following cluster redirect"
                    );
                    let origin = std::mem::replace(&mut self.source, NodeSource::Slot(0));
                    self.source = NodeSource::redirected(origin, &redirect);
                    // redirects do not consume retry budget
                    attempts_left = retry_attempts;
                    continue;
                }
                AttemptOutcome::Retriable(err) => {
                    if self.no_retry {
                        return Err(err);
                    }
                    err
                }
                AttemptOutcome::TimedOut => {
                    let err = DispatchError::Connection(format!(
                        "attempt exceeded {}ms transport timeout",
                        attempt_timeout.as_millis()
                    ));
                    if self.no_retry {
                        return Err(err);
                    }
                    err
                }
            };

            if attempts_left == 0 {
                warn!(
                    command = %self.command.name(),
                    attempts = attempts_made,
                    last = %cause,
                    "retry budget exhausted"
                );
                return Err(DispatchError::Timeout {
                    attempts: attempts_made,
                    last: cause.to_string(),
                });
            }
            attempts_left -= 1;
            debug!(
                command = %self.command.name(),
                attempts_left,
                cause = %cause,
                "retrying after retriable failure"
            );
            sleep(retry_interval).await;
        }
    }

    /// One attempt: resolve a connection, send an ASKING prologue when the
    /// source carries an ASK override, write the command, classify the reply.
    async fn attempt(&mut self, attempt_timeout: Duration) -> AttemptOutcome {
        let conn = match self.manager.connection(self.read_only, &self.source).await {
            Ok(conn) => conn,
            Err(err) => return classify(err),
        };
        self.last_client = Some(conn.client());

        if matches!(
            self.source,
            NodeSource::Redirected {
                kind: RedirectKind::Ask,
                ..
            }
        ) {
            if let Err(err) = conn.execute(&self.codec, &command::asking(), &[]).await {
                return classify(err);
            }
        }

        match timeout(
            attempt_timeout,
            conn.execute(&self.codec, &self.command, &self.args),
        )
        .await
        {
            Err(_) => AttemptOutcome::TimedOut,
            Ok(Ok(value)) => AttemptOutcome::Success(value),
            Ok(Err(err)) => classify(err),
        }
    }
}

fn classify(err: DispatchError) -> AttemptOutcome {
    match err {
        DispatchError::Redirect(redirect) => AttemptOutcome::Redirect(redirect),
        DispatchError::Server(text) => match parse_redirect(&text) {
            Some(redirect) => AttemptOutcome::Redirect(redirect),
            None => AttemptOutcome::Fatal(DispatchError::Server(text)),
        },
        err if err.is_retriable() => AttemptOutcome::Retriable(err),
        other => AttemptOutcome::Fatal(other),
    }
}

/// Parse a MOVED/ASK reply ("MOVED 3999 127.0.0.1:6381").
pub fn parse_redirect(text: &str) -> Option<Redirect> {
    let mut parts = text.split_whitespace();
    let kind = parts.next()?;
    if kind == "MOVED" {
        let slot = parts.next()?.parse::<u16>().ok()?;
        let target = ClientHandle::new(parts.next()?);
        Some(Redirect::Moved { slot, target })
    } else if kind == "ASK" {
        let _slot = parts.next()?;
        let target = ClientHandle::new(parts.next()?);
        Some(Redirect::Ask { target })
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_moved_redirect() {
        let redirect = parse_redirect("MOVED 3999 127.0.0.1:6381").unwrap();
        match redirect {
            Redirect::Moved { slot, target } => {
                assert_eq!(slot, 3999);
                assert_eq!(target.as_str(), "127.0.0.1:6381");
            }
            _ => panic!("expected MOVED"),
        }
    }

    #[test]
    fn parse_ask_redirect() {
        let redirect = parse_redirect("ASK 202 127.0.0.1:6382").unwrap();
        match redirect {
            Redirect::Ask { target } => assert_eq!(target.as_str(), "127.0.0.1:6382"),
            _ => panic!("expected ASK"),
        }
    }

    #[test]
    fn ordinary_errors_are_not_redirects() {
        assert!(parse_redirect("ERR unknown command").is_none());
        assert!(parse_redirect("MOVED not-a-slot 127.0.0.1:6381").is_none());
    }
}

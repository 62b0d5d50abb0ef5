//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::PoisonError;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{Mutex, MutexGuard};

use crate::channel::{ChannelError, CommandOutput, CommandRunner, RunOptions};
use crate::provider::{
    InstanceHandle, InstanceSnapshot, InstanceSpec, NetworkAddress, Provider, ProviderFuture,
};
use crate::provision::{Clock, SleepFuture};

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Used to drive deterministic command outcomes without spawning processes.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: std::rc::Rc<std::cell::RefCell<std::collections::VecDeque<CommandOutput>>>,
    invocations: std::rc::Rc<std::cell::RefCell<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Execution options the caller supplied.
    pub options: RunOptions,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }

    /// Returns the stdin payload recorded for this invocation, if any.
    #[must_use]
    pub fn stdin(&self) -> Option<&str> {
        self.options.stdin.as_deref()
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations.borrow().clone()
    }

    /// Returns how many invocations have been recorded.
    #[must_use]
    pub fn invocation_count(&self) -> usize {
        self.invocations.borrow().len()
    }

    /// Pushes a successful exit status with empty output.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a specific exit code with empty output.
    pub fn push_exit_code(&self, code: i32) {
        self.push_output(Some(code), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes a response with no exit code to simulate abnormal termination.
    pub fn push_missing_exit_code(&self) {
        self.push_output(None, "", "");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses.borrow_mut().push_back(CommandOutput {
            code,
            stdout: stdout.into(),
            stderr: stderr.into(),
        });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        options: &RunOptions,
    ) -> Result<CommandOutput, ChannelError> {
        self.invocations.borrow_mut().push(CommandInvocation {
            program: program.to_owned(),
            args: args.to_vec(),
            options: options.clone(),
        });
        self.responses
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| ChannelError::Spawn {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and cleans up variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets a single environment variable while holding a global mutex.
    pub async fn set_var(key: &str, value: &str) -> Self {
        Self::set_vars(&[(key, value)]).await
    }

    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

/// Clock whose time only advances when `sleep` is awaited.
///
/// Lets wait-loop tests simulate elapsed time without real delay while
/// recording every sleep that was requested.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: std::sync::Arc<std::sync::Mutex<Instant>>,
    slept: std::sync::Arc<std::sync::Mutex<Vec<Duration>>>,
}

impl ManualClock {
    /// Creates a clock starting at the current instant.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now: std::sync::Arc::new(std::sync::Mutex::new(Instant::now())),
            slept: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Returns every sleep duration requested so far, in order.
    #[must_use]
    pub fn sleeps(&self) -> Vec<Duration> {
        self.slept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sleep(&self, duration: Duration) -> SleepFuture<'_> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) += duration;
        self.slept
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(duration);
        Box::pin(std::future::ready(()))
    }
}

/// Error type reported by [`FakeProvider`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("fake provider error: {0}")]
pub struct FakeProviderError(pub String);

/// Scripted provider double for provisioning tests.
///
/// Status polls consume a queue and fall back to a configurable resting
/// status once it is drained; destroy calls are recorded and always succeed,
/// mirroring the idempotent teardown contract.
#[derive(Clone, Debug)]
pub struct FakeProvider {
    handle_id: String,
    create_error: Option<String>,
    statuses: std::sync::Arc<std::sync::Mutex<VecDeque<String>>>,
    resting_status: String,
    addresses: Vec<NetworkAddress>,
    status_calls: std::sync::Arc<std::sync::Mutex<u32>>,
    destroyed: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

impl FakeProvider {
    /// Creates a provider that will report `handle_id` for created instances.
    #[must_use]
    pub fn new(handle_id: impl Into<String>) -> Self {
        Self {
            handle_id: handle_id.into(),
            create_error: None,
            statuses: std::sync::Arc::new(std::sync::Mutex::new(VecDeque::new())),
            resting_status: String::from("new"),
            addresses: Vec::new(),
            status_calls: std::sync::Arc::new(std::sync::Mutex::new(0)),
            destroyed: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    /// Makes `create_instance` fail with the given message.
    #[must_use]
    pub fn with_create_error(mut self, message: impl Into<String>) -> Self {
        self.create_error = Some(message.into());
        self
    }

    /// Sets the status reported once the queued statuses are drained.
    #[must_use]
    pub fn with_resting_status(mut self, status: impl Into<String>) -> Self {
        self.resting_status = status.into();
        self
    }

    /// Sets the network interfaces snapshots report.
    #[must_use]
    pub fn with_addresses(mut self, addresses: Vec<NetworkAddress>) -> Self {
        self.addresses = addresses;
        self
    }

    /// Queues a status for the next poll.
    pub fn push_status(&self, status: impl Into<String>) {
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(status.into());
    }

    /// Number of status polls performed so far.
    #[must_use]
    pub fn status_calls(&self) -> u32 {
        *self
            .status_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Instance identifiers destroy has been called with, in order.
    #[must_use]
    pub fn destroyed(&self) -> Vec<String> {
        self.destroyed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn next_status(&self) -> String {
        *self
            .status_calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner) += 1;
        self.statuses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| self.resting_status.clone())
    }
}

impl Provider for FakeProvider {
    type Error = FakeProviderError;

    fn slug(&self) -> &'static str {
        "fake"
    }

    fn create_instance<'a>(
        &'a self,
        _spec: &'a InstanceSpec,
    ) -> ProviderFuture<'a, InstanceHandle, Self::Error> {
        Box::pin(async move {
            if let Some(message) = &self.create_error {
                return Err(FakeProviderError(message.clone()));
            }
            Ok(InstanceHandle {
                id: self.handle_id.clone(),
            })
        })
    }

    fn instance_status<'a>(
        &'a self,
        _handle: &'a InstanceHandle,
    ) -> ProviderFuture<'a, String, Self::Error> {
        Box::pin(async move { Ok(self.next_status()) })
    }

    fn fetch_instance<'a>(
        &'a self,
        handle: &'a InstanceHandle,
    ) -> ProviderFuture<'a, InstanceSnapshot, Self::Error> {
        Box::pin(async move {
            Ok(InstanceSnapshot {
                id: handle.id.clone(),
                status: self.resting_status.clone(),
                addresses: self.addresses.clone(),
            })
        })
    }

    fn destroy_instance<'a>(
        &'a self,
        handle: &'a InstanceHandle,
    ) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.destroyed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(handle.id.clone());
            Ok(())
        })
    }
}

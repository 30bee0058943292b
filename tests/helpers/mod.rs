//! Scripted doubles for the process executor and for cluster nodes
#![allow(dead_code)]

use async_trait::async_trait;
use regression_runner::coordinator::CoordinatorSettings;
use regression_runner::core::{ErrorCodes, NodeError};
use regression_runner::environment::{Node, QueryRequest};
use regression_runner::process::{CommandOutput, CommandSpec, ProcessError, ProcessExecutor};
use regression_runner::scenarios::ScenarioContext;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn ok(stdout: &str) -> CommandOutput {
    CommandOutput::new(0, stdout, "")
}

pub fn exit(code: i32, stderr: &str) -> CommandOutput {
    CommandOutput::new(code, "", stderr)
}

/// Canned answers keyed by substring, plus a log of everything asked
///
/// The first rule whose pattern occurs in the request answers it. A rule
/// hands out its outputs in order and keeps repeating the last one.
/// Requests no rule matches get a successful empty output.
#[derive(Default)]
pub struct Script {
    rules: Mutex<Vec<(String, VecDeque<CommandOutput>)>>,
    calls: Mutex<Vec<String>>,
}

impl Script {
    pub fn on(&self, pattern: &str, outputs: Vec<CommandOutput>) {
        assert!(!outputs.is_empty(), "rule for {} needs an output", pattern);
        self.rules
            .lock()
            .unwrap()
            .push((pattern.to_string(), outputs.into_iter().collect()));
    }

    pub fn answer(&self, request: &str) -> CommandOutput {
        self.calls.lock().unwrap().push(request.to_string());

        let mut rules = self.rules.lock().unwrap();
        for (pattern, outputs) in rules.iter_mut() {
            if request.contains(pattern.as_str()) {
                return if outputs.len() > 1 {
                    outputs.pop_front().unwrap()
                } else {
                    outputs[0].clone()
                };
            }
        }
        ok("")
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// How many requests contained `pattern`
    pub fn count(&self, pattern: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.contains(pattern))
            .count()
    }
}

/// Process executor answering from a [`Script`]
#[derive(Default)]
pub struct FakeExecutor {
    pub script: Script,
}

impl FakeExecutor {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl ProcessExecutor for FakeExecutor {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, ProcessError> {
        Ok(self.script.answer(&spec.display()))
    }
}

/// Node answering shell commands and queries from two scripts
pub struct FakeNode {
    name: String,
    pub commands: Script,
    pub queries: Script,
    stops: AtomicUsize,
    starts: AtomicUsize,
    log_size: AtomicU64,
}

impl FakeNode {
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            commands: Script::default(),
            queries: Script::default(),
            stops: AtomicUsize::new(0),
            starts: AtomicUsize::new(0),
            log_size: AtomicU64::new(0),
        })
    }

    /// A node whose server log is clean and whose config changes are observed
    ///
    /// The marker shows up in the merged config on apply and is gone on revert.
    pub fn reloading(name: &str) -> Arc<Self> {
        let node = Self::new(name);
        node.commands
            .on("preprocessed_configs", vec![ok(""), exit(1, "")]);
        node.commands.on("head -c", vec![exit(1, "")]);
        node.queries.on("system.processes", vec![ok("{\"data\": []}")]);
        node.queries.on("system.query_log", vec![ok("{\"data\": []}")]);
        node
    }

    pub fn set_log_size(&self, size: u64) {
        self.log_size.store(size, Ordering::SeqCst);
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }

    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Node for FakeNode {
    fn name(&self) -> &str {
        &self.name
    }

    async fn command(&self, script: &str) -> Result<CommandOutput, NodeError> {
        Ok(self.commands.answer(script))
    }

    async fn query(&self, request: &QueryRequest) -> Result<CommandOutput, NodeError> {
        Ok(self.queries.answer(&request.sql))
    }

    async fn stop(&self) -> Result<(), NodeError> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn start(&self) -> Result<(), NodeError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn file_size(&self, _path: &str) -> Result<u64, NodeError> {
        Ok(self.log_size.load(Ordering::SeqCst))
    }
}

/// Coordinator settings with short waits, hot reload by default
pub fn fast_settings() -> CoordinatorSettings {
    CoordinatorSettings {
        timeout: Duration::from_millis(200),
        poll_interval: Duration::from_millis(10),
        restart: false,
        err_log_tail: 30,
    }
}

pub fn context_for(node: Arc<FakeNode>) -> Arc<ScenarioContext> {
    Arc::new(ScenarioContext::new(node, fast_settings(), ErrorCodes::default()))
}

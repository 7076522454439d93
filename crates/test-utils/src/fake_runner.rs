use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use borgsched::exec::{CommandOutput, CommandSpec, ProcessRunner};

/// What the fake does when a matching command is run.
#[derive(Debug, Clone)]
pub enum Reply {
    Output(CommandOutput),
    /// Take this long to finish. If the command's timeout is shorter, the
    /// command is reported as timed out at its timeout instead.
    Delayed(Duration, CommandOutput),
    Panic(String),
}

impl Reply {
    pub fn ok(stdout: &str) -> Self {
        Reply::Output(CommandOutput::from_exit(0, stdout.to_string(), String::new()))
    }

    pub fn fail(exit_code: i32, stderr: &str) -> Self {
        Reply::Output(CommandOutput::from_exit(exit_code, String::new(), stderr.to_string()))
    }
}

/// A fake process runner that:
/// - records every command it was asked to run
/// - answers borg subcommands (`create`, `prune`, ...) and hook scripts with
///   scripted replies, falling back to a silent exit 0.
///
/// Replies for one key are consumed in order; the last one repeats.
#[derive(Clone, Default)]
pub struct FakeRunner {
    replies: Arc<Mutex<HashMap<String, VecDeque<Reply>>>>,
    calls: Arc<Mutex<Vec<CommandSpec>>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reply to `borg <subcommand>`.
    pub fn on(self, subcommand: &str, reply: Reply) -> Self {
        self.push(subcommand.to_string(), reply);
        self
    }

    /// Reply to a hook running exactly `script`.
    pub fn on_script(self, script: &str, reply: Reply) -> Self {
        self.push(script_key(script), reply);
        self
    }

    fn push(&self, key: String, reply: Reply) {
        self.replies
            .lock()
            .unwrap()
            .entry(key)
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Borg subcommands and hook scripts in call order, e.g.
    /// `["sh: echo pre", "create", "prune", "compact"]`.
    pub fn call_keys(&self) -> Vec<String> {
        self.calls().iter().map(key_of).collect()
    }

    pub fn count(&self, key: &str) -> usize {
        self.call_keys().iter().filter(|k| *k == key).count()
    }

    fn next_reply(&self, key: &str) -> Option<Reply> {
        let mut replies = self.replies.lock().unwrap();
        let queue = replies.get_mut(key)?;
        if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        }
    }
}

impl ProcessRunner for FakeRunner {
    fn run(&self, spec: CommandSpec) -> Pin<Box<dyn Future<Output = CommandOutput> + Send + '_>> {
        let key = key_of(&spec);
        self.calls.lock().unwrap().push(spec.clone());
        let reply = self.next_reply(&key);

        Box::pin(async move {
            match reply {
                None => CommandOutput::from_exit(0, String::new(), String::new()),
                Some(Reply::Output(out)) => out,
                Some(Reply::Delayed(delay, out)) => {
                    if delay > spec.timeout {
                        tokio::time::sleep(spec.timeout).await;
                        CommandOutput::timeout(&spec.program, spec.timeout, String::new(), String::new())
                    } else {
                        tokio::time::sleep(delay).await;
                        out
                    }
                }
                Some(Reply::Panic(message)) => panic!("{message}"),
            }
        })
    }
}

fn script_key(script: &str) -> String {
    format!("sh: {script}")
}

fn key_of(spec: &CommandSpec) -> String {
    match spec.args.first().map(String::as_str) {
        Some("-c") | Some("/C") => script_key(spec.args.get(1).map_or("", String::as_str)),
        Some(sub) => sub.to_string(),
        None => spec.program.clone(),
    }
}

/// `borg create --json` output for an archive named `name`.
pub fn create_json(
    name: &str,
    original_size: u64,
    compressed_size: u64,
    deduplicated_size: u64,
    nfiles: u64,
    duration: f64,
) -> String {
    serde_json::json!({
        "archive": {
            "id": "4e3f1c2b9a",
            "name": name,
            "start": "2025-01-02T03:04:05.000000",
            "end": "2025-01-02T03:09:05.000000",
            "duration": duration,
            "stats": {
                "original_size": original_size,
                "compressed_size": compressed_size,
                "deduplicated_size": deduplicated_size,
                "nfiles": nfiles
            }
        },
        "repository": { "id": "abc123", "location": "/srv/borg/main" }
    })
    .to_string()
}

/// The canonical stats fixture: 1000 / 600 / 400 bytes, 10 files, 300 s.
pub fn stats_fixture(name: &str) -> String {
    create_json(name, 1000, 600, 400, 10, 300.0)
}

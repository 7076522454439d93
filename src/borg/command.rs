// src/borg/command.rs

//! Pure translation of a repository descriptor plus an operation into a borg
//! argument vector and environment overlay.
//!
//! Nothing here touches the filesystem or spawns processes. Secrets
//! (repository passphrase, SSH password) only ever travel in the environment
//! overlay, never in the argument vector, and [`BorgCommand`]'s `Display`
//! impl omits the environment entirely so a command can be logged as-is.

use std::collections::BTreeMap;
use std::fmt;

use crate::model::{Repository, RetentionPolicy};
use crate::types::{EncryptionMode, RepoType, SshAuthMethod};

pub const ENV_PASSPHRASE: &str = "BORG_PASSPHRASE";
pub const ENV_SSHPASS: &str = "SSHPASS";
pub const ENV_UNKNOWN_UNENCRYPTED_OK: &str = "BORG_UNKNOWN_UNENCRYPTED_REPO_ACCESS_IS_OK";
pub const ENV_RELOCATED_OK: &str = "BORG_RELOCATED_REPO_ACCESS_IS_OK";

/// SSH options applied to every remote repository: never prompt, never
/// remember host keys.
const SSH_OPTIONS: [&str; 8] = [
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "LogLevel=ERROR",
    "-o",
    "BatchMode=yes",
];

/// A fully built borg invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BorgCommand {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl BorgCommand {
    /// The borg subcommand (`create`, `prune`, ...).
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    pub fn has_arg(&self, arg: &str) -> bool {
        self.args.iter().any(|a| a == arg)
    }

    /// Append `--json` to `info`/`list` invocations unless a JSON flag
    /// (`--json` or `--json-lines`) is already present.
    pub fn ensure_json_flag(&mut self) {
        let wants_json = matches!(self.subcommand(), Some("info") | Some("list"));
        if wants_json && !self.has_arg("--json") && !self.has_arg("--json-lines") {
            self.args.push("--json".to_string());
        }
    }
}

impl fmt::Display for BorgCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", shell_quote(&self.program))?;
        for arg in &self.args {
            write!(f, " {}", shell_quote(arg))?;
        }
        Ok(())
    }
}

/// Quote a single word for display in a POSIX shell.
fn shell_quote(word: &str) -> String {
    let plain = !word.is_empty()
        && word
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+%{}".contains(c));
    if plain {
        word.to_string()
    } else {
        format!("'{}'", word.replace('\'', r"'\''"))
    }
}

/// Parameters of a `borg create` invocation.
#[derive(Debug, Clone)]
pub struct CreateOptions<'a> {
    pub archive_name: &'a str,
    pub source_paths: &'a [String],
    pub exclusion_patterns: &'a [String],
    pub compression: &'a str,
    /// Seconds between checkpoints written during a long backup.
    pub checkpoint_interval: u64,
}

/// Builds [`BorgCommand`]s for a configured borg binary.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    borg_binary: String,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new("borg")
    }
}

impl CommandBuilder {
    pub fn new(borg_binary: impl Into<String>) -> Self {
        Self {
            borg_binary: borg_binary.into(),
        }
    }

    pub fn borg_binary(&self) -> &str {
        &self.borg_binary
    }

    /// `borg init --encryption=<mode> <target>`
    pub fn init(&self, repo: &Repository, encryption: EncryptionMode) -> BorgCommand {
        self.build(
            repo,
            "init",
            vec![format!("--encryption={}", encryption)],
            vec![repo.url.clone()],
        )
    }

    /// `borg create --compression=.. --checkpoint-interval=.. --stats --json [--exclude p]* <target>::<name> <paths..>`
    pub fn create(&self, repo: &Repository, opts: &CreateOptions<'_>) -> BorgCommand {
        let mut flags = vec![
            format!("--compression={}", opts.compression),
            format!("--checkpoint-interval={}", opts.checkpoint_interval),
            "--stats".to_string(),
            "--json".to_string(),
        ];
        for pattern in opts.exclusion_patterns {
            flags.push("--exclude".to_string());
            flags.push(pattern.clone());
        }

        let mut positionals = vec![archive_target(repo, opts.archive_name)];
        positionals.extend(opts.source_paths.iter().cloned());

        self.build(repo, "create", flags, positionals)
    }

    /// `borg list --json <target>`
    pub fn list_archives(&self, repo: &Repository) -> BorgCommand {
        self.build(
            repo,
            "list",
            vec!["--json".to_string()],
            vec![repo.url.clone()],
        )
    }

    /// `borg list --json-lines <target>::<archive> [path]`
    pub fn list_contents(
        &self,
        repo: &Repository,
        archive_name: &str,
        path: Option<&str>,
    ) -> BorgCommand {
        let mut positionals = vec![archive_target(repo, archive_name)];
        if let Some(path) = path.filter(|p| !p.is_empty()) {
            positionals.push(path.to_string());
        }
        self.build(repo, "list", vec!["--json-lines".to_string()], positionals)
    }

    /// `borg info --json <target>`
    pub fn repository_info(&self, repo: &Repository) -> BorgCommand {
        self.build(
            repo,
            "info",
            vec!["--json".to_string()],
            vec![repo.url.clone()],
        )
    }

    /// `borg info --json <target>::<archive>`
    pub fn archive_info(&self, repo: &Repository, archive_name: &str) -> BorgCommand {
        self.build(
            repo,
            "info",
            vec!["--json".to_string()],
            vec![archive_target(repo, archive_name)],
        )
    }

    /// `borg delete <target>::<archive>`
    pub fn delete_archive(&self, repo: &Repository, archive_name: &str) -> BorgCommand {
        self.build(
            repo,
            "delete",
            Vec::new(),
            vec![archive_target(repo, archive_name)],
        )
    }

    /// `borg prune --stats --list [--keep-<tier> N]* <target>`
    pub fn prune(&self, repo: &Repository, retention: &RetentionPolicy) -> BorgCommand {
        let mut flags = vec!["--stats".to_string(), "--list".to_string()];
        for (flag, count) in retention.tiers() {
            flags.push(flag.to_string());
            flags.push(count.to_string());
        }
        self.build(repo, "prune", flags, vec![repo.url.clone()])
    }

    /// `borg compact --verbose <target>`
    pub fn compact(&self, repo: &Repository) -> BorgCommand {
        self.build(
            repo,
            "compact",
            vec!["--verbose".to_string()],
            vec![repo.url.clone()],
        )
    }

    fn build(
        &self,
        repo: &Repository,
        subcommand: &str,
        flags: Vec<String>,
        positionals: Vec<String>,
    ) -> BorgCommand {
        let mut args = Vec::with_capacity(1 + flags.len() + positionals.len() + 4);
        args.push(subcommand.to_string());
        args.extend(flags);

        if repo.repo_type == RepoType::Ssh {
            if let Some(remote_path) = repo.remote_path.as_deref().filter(|p| !p.is_empty()) {
                args.push("--remote-path".to_string());
                args.push(remote_path.to_string());
            }
            if let Some(rsh) = rsh_command(repo) {
                args.push("--rsh".to_string());
                args.push(rsh);
            }
        }

        args.extend(positionals);

        let mut cmd = BorgCommand {
            program: self.borg_binary.clone(),
            args,
            env: repository_env(repo),
        };
        cmd.ensure_json_flag();
        cmd
    }
}

/// `<target>::<archive>`
pub fn archive_target(repo: &Repository, archive_name: &str) -> String {
    format!("{}::{}", repo.url, archive_name)
}

/// The remote-shell command borg should use for an SSH repository.
///
/// Password auth goes through `sshpass -e`, which reads the password from
/// `SSHPASS` (see [`repository_env`]).
pub fn rsh_command(repo: &Repository) -> Option<String> {
    if repo.repo_type != RepoType::Ssh {
        return None;
    }

    let mut parts: Vec<&str> = Vec::new();
    let password_auth =
        repo.ssh_auth_method == SshAuthMethod::Password && repo.ssh_password.is_some();
    if password_auth {
        parts.extend(["sshpass", "-e"]);
    }
    parts.push("ssh");
    parts.extend(SSH_OPTIONS);

    if repo.ssh_auth_method == SshAuthMethod::Key {
        if let Some(key) = repo.ssh_key_path.as_deref().filter(|k| !k.is_empty()) {
            parts.push("-i");
            parts.push(key);
        }
    }

    Some(parts.join(" "))
}

/// Environment overlay for any borg invocation against `repo`.
pub fn repository_env(repo: &Repository) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();

    if let Some(passphrase) = repo.passphrase.as_deref().filter(|p| !p.is_empty()) {
        env.insert(ENV_PASSPHRASE.to_string(), passphrase.to_string());
    }

    if repo.repo_type == RepoType::Ssh && repo.ssh_auth_method == SshAuthMethod::Password {
        if let Some(password) = repo.ssh_password.as_deref() {
            env.insert(ENV_SSHPASS.to_string(), password.to_string());
        }
    }

    env.insert(ENV_UNKNOWN_UNENCRYPTED_OK.to_string(), "yes".to_string());
    env.insert(ENV_RELOCATED_OK.to_string(), "yes".to_string());

    env
}

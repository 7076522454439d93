use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// A `borg` stand-in shell script in a temp directory.
///
/// Every invocation appends its arguments (one line per call) to a log file.
/// `borg create` prints the configured JSON; any subcommand listed with
/// [`FakeBorg::failing`] exits 2 with a message on stderr.
pub struct FakeBorg {
    dir: TempDir,
    script: PathBuf,
    calls: PathBuf,
}

impl FakeBorg {
    pub fn new(create_json: &str) -> io::Result<Self> {
        Self::build(create_json, &[], None)
    }

    pub fn failing(create_json: &str, failing: &[&str]) -> io::Result<Self> {
        Self::build(create_json, failing, None)
    }

    /// `borg create` sleeps `seconds` before printing anything.
    pub fn slow(create_json: &str, seconds: u32) -> io::Result<Self> {
        Self::build(create_json, &[], Some(seconds))
    }

    fn build(create_json: &str, failing: &[&str], sleep: Option<u32>) -> io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let script = dir.path().join("borg");
        let calls = dir.path().join("calls.log");

        let mut cases = String::new();
        for sub in failing {
            cases.push_str(&format!(
                "  {sub}) echo \"{sub}: simulated failure\" >&2; exit 2 ;;\n"
            ));
        }
        let sleep = sleep.map(|s| format!("sleep {s}\n    ")).unwrap_or_default();

        let body = format!(
            "#!/bin/sh\n\
             echo \"$*\" >> '{calls}'\n\
             case \"$1\" in\n\
             {cases}  create)\n    {sleep}cat <<'BORG_JSON'\n{create_json}\nBORG_JSON\n    ;;\n\
             esac\n\
             exit 0\n",
            calls = calls.display(),
        );
        fs::write(&script, body)?;
        make_executable(&script)?;

        Ok(Self { dir, script, calls })
    }

    pub fn path(&self) -> &Path {
        &self.script
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Arguments of every call so far, in order.
    pub fn calls(&self) -> Vec<String> {
        fs::read_to_string(&self.calls)
            .map(|s| s.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    pub fn subcommands(&self) -> Vec<String> {
        self.calls()
            .iter()
            .filter_map(|line| line.split_whitespace().next().map(str::to_string))
            .collect()
    }
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

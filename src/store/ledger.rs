// src/store/ledger.rs

//! JSON-lines run ledger.
//!
//! Every `create_run` / `update_run` appends the full record as one line.
//! On open the file is replayed; the last line for a run id wins.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::Context;
use tracing::{debug, info, warn};

use crate::errors::{BorgschedError, Result};
use crate::model::RunRecord;
use crate::types::{JobId, RunId};

use super::{RunLedger, sort_newest_first};

/// Default ledger location, relative to the working directory.
pub const DEFAULT_LEDGER_PATH: &str = ".borgsched/runs.jsonl";

struct State {
    runs: BTreeMap<RunId, RunRecord>,
    next_id: RunId,
}

pub struct FileLedger {
    path: PathBuf,
    state: Mutex<State>,
}

impl FileLedger {
    /// Open (or create) the ledger at `path`, replaying existing records.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating ledger directory {parent:?}"))?;
        }

        let runs = replay(&path)?;
        terminate_torn_line(&path)?;
        let next_id = runs.keys().next_back().map_or(1, |id| id + 1);
        info!(path = ?path, runs = runs.len(), "opened run ledger");

        Ok(Self {
            path,
            state: Mutex::new(State { runs, next_id }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn append(&self, run: &RunRecord) -> Result<()> {
        let mut line = serde_json::to_string(run)?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening ledger {:?} for append", self.path))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("appending to ledger {:?}", self.path))?;
        Ok(())
    }
}

fn replay(path: &Path) -> Result<BTreeMap<RunId, RunRecord>> {
    let mut runs = BTreeMap::new();
    if !path.exists() {
        return Ok(runs);
    }

    let file = File::open(path).with_context(|| format!("opening ledger {path:?}"))?;
    for (lineno, line_res) in BufReader::new(file).lines().enumerate() {
        let line = line_res?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        match serde_json::from_str::<RunRecord>(trimmed) {
            Ok(run) => {
                runs.insert(run.id, run);
            }
            Err(e) => {
                // A crash mid-write can leave a torn final line.
                warn!(path = ?path, line = lineno + 1, error = %e, "skipping unreadable ledger line");
            }
        }
    }
    Ok(runs)
}

/// Make sure the next append starts on a fresh line.
fn terminate_torn_line(path: &Path) -> Result<()> {
    let contents = match fs::read(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if contents.last().is_some_and(|b| *b != b'\n') {
        OpenOptions::new()
            .append(true)
            .open(path)
            .and_then(|mut file| file.write_all(b"\n"))
            .with_context(|| format!("repairing ledger {path:?}"))?;
    }
    Ok(())
}

impl RunLedger for FileLedger {
    fn create_run(&self, mut run: RunRecord) -> Result<RunRecord> {
        let mut state = self.lock();
        run.id = state.next_id;
        self.append(&run)?;
        state.next_id += 1;
        state.runs.insert(run.id, run.clone());
        debug!(run_id = run.id, job_id = run.job_id, "created run record (file)");
        Ok(run)
    }

    fn update_run(&self, run: &RunRecord) -> Result<()> {
        let mut state = self.lock();
        if !state.runs.contains_key(&run.id) {
            return Err(BorgschedError::RunNotFound(run.id));
        }
        self.append(run)?;
        state.runs.insert(run.id, run.clone());
        Ok(())
    }

    fn get_run(&self, id: RunId) -> Result<Option<RunRecord>> {
        Ok(self.lock().runs.get(&id).cloned())
    }

    fn runs_for_job(&self, job_id: JobId, limit: usize) -> Result<Vec<RunRecord>> {
        let mut runs: Vec<RunRecord> = self
            .lock()
            .runs
            .values()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect();
        sort_newest_first(&mut runs);
        runs.truncate(limit);
        Ok(runs)
    }
}

//! Phase progress and trace sinks.
//!
//! Progress is emitted on **stderr** so stdout stays parseable for scripts.
//! [`TraceLog`] additionally keeps every prompt and response of a run under
//! `{reports_dir}/trace_{mode}_{run_tag}/`.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use faultline_core::progress::{NoProgress, PhaseEvent, ProgressReporter};
use faultline_core::models::{sha256_hex, RunContext};
use tracing::warn;

/// Human-friendly progress on stderr: "detect  12 / 340 chunks  (cached)".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: PhaseEvent) {
        let line = match &event {
            PhaseEvent::Started { phase, total } => {
                format!("{}  starting  {} chunks\n", phase, format_number(*total as u64))
            }
            PhaseEvent::ChunkDone {
                phase,
                n,
                total,
                cached,
                ..
            } => format!(
                "{}  {} / {} chunks{}\n",
                phase,
                format_number(*n as u64),
                format_number(*total as u64),
                if *cached { "  (cached)" } else { "" }
            ),
            PhaseEvent::Unparsed { phase, chunk_id } => {
                format!("{}  unparsed response for {}\n", phase, chunk_id)
            }
            PhaseEvent::Exchange { .. } => return,
            PhaseEvent::Finished {
                phase,
                attempted,
                reused,
                unparsed,
            } => format!(
                "{}  done  {} called, {} cached, {} unparsed\n",
                phase,
                format_number(*attempted as u64),
                format_number(*reused as u64),
                format_number(*unparsed as u64)
            ),
        };
        let _ = std::io::stderr().lock().write_all(line.as_bytes());
        let _ = std::io::stderr().lock().flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
/// Prompt and response bodies are left to the trace log.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: PhaseEvent) {
        if matches!(event, PhaseEvent::Exchange { .. }) {
            return;
        }
        if let Ok(line) = serde_json::to_string(&event) {
            let _ = writeln!(std::io::stderr().lock(), "{}", line);
            let _ = std::io::stderr().lock().flush();
        }
    }
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq, clap::ValueEnum)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

/// Per-run trace of model exchanges.
///
/// Every event is appended to `trace.jsonl`. Each exchange is also dumped
/// as a `{seq}_{phase}_{chunk}.prompt.txt` / `.response.txt` pair. Write
/// failures are logged and never fail the run.
pub struct TraceLog {
    dir: PathBuf,
    state: Mutex<TraceState>,
}

struct TraceState {
    seq: u64,
    events: Option<File>,
}

impl TraceLog {
    pub fn dir_for(reports_dir: &Path, ctx: &RunContext) -> PathBuf {
        reports_dir.join(format!("trace_{}_{}", ctx.mode, ctx.run_tag))
    }

    pub fn open(reports_dir: &Path, ctx: &RunContext) -> anyhow::Result<Self> {
        let dir = Self::dir_for(reports_dir, ctx);
        fs::create_dir_all(&dir)?;
        let events = OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join("trace.jsonl"))?;
        let seq = next_seq(&dir);
        Ok(Self {
            dir,
            state: Mutex::new(TraceState {
                seq,
                events: Some(events),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn dump(
        &self,
        seq: u64,
        phase: &str,
        chunk_id: &str,
        prompt: &str,
        response: &str,
    ) -> std::io::Result<()> {
        let stem = format!("{:05}_{}_{}", seq, phase, file_safe(chunk_id));
        fs::write(self.dir.join(format!("{}.prompt.txt", stem)), prompt)?;
        fs::write(self.dir.join(format!("{}.response.txt", stem)), response)
    }
}

impl ProgressReporter for TraceLog {
    fn report(&self, event: PhaseEvent) {
        let mut state = self.state.lock().unwrap();
        if let PhaseEvent::Exchange {
            phase,
            chunk_id,
            prompt,
            response,
            ..
        } = &event
        {
            state.seq += 1;
            if let Err(e) = self.dump(state.seq, phase.as_str(), chunk_id, prompt, response) {
                warn!(error = %e, chunk = %chunk_id, "failed to write trace dump");
            }
        }

        let Some(file) = state.events.as_mut() else {
            return;
        };
        let line = match &event {
            PhaseEvent::Exchange {
                phase,
                chunk_id,
                duration_ms,
                ..
            } => serde_json::json!({
                "event": "exchange",
                "phase": phase,
                "chunk_id": chunk_id,
                "duration_ms": duration_ms,
            })
            .to_string(),
            other => match serde_json::to_string(other) {
                Ok(line) => line,
                Err(_) => return,
            },
        };
        if let Err(e) = writeln!(file, "{}", line) {
            warn!(error = %e, "trace log write failed, disabling trace");
            state.events = None;
        }
    }
}

/// Resume continues numbering after the dumps already present.
fn next_seq(dir: &Path) -> u64 {
    let Ok(entries) = fs::read_dir(dir) else {
        return 0;
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            let name = e.file_name().to_string_lossy().to_string();
            name.split('_').next()?.parse::<u64>().ok()
        })
        .max()
        .unwrap_or(0)
}

/// Chunk ids carry path separators; keep a readable prefix plus a short
/// digest so distinct ids never collide.
fn file_safe(chunk_id: &str) -> String {
    let readable: String = chunk_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .take(60)
        .collect();
    format!("{}_{}", readable, &sha256_hex(chunk_id.as_bytes())[..8])
}

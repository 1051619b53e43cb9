// Trace source: per-core instruction streams read from `<base>_<core>.data` files.

use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use log::info;
use thiserror::Error;

use crate::commons::{Addr, Instr};

#[derive(Error, Debug)]
pub enum TraceError {
    #[error("failed to read trace file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{path}:{line}: {reason}")]
    Malformed {
        path: PathBuf,
        line: usize,
        reason: String,
    },
}

/// One line of a trace file.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum TraceOp {
    Load(Addr),
    Store(Addr),
    Other(u32),
}

/// An instruction stream for one core.
///
/// `Other(n)` lines are handed out one cycle at a time; once the stream is
/// exhausted `Instr::End` is returned forever.
#[derive(Clone, Debug, Default)]
pub struct Trace {
    ops: VecDeque<TraceOp>,
    busy: u32,
}

impl Trace {
    pub fn new(ops: impl IntoIterator<Item = TraceOp>) -> Self {
        Trace {
            ops: ops.into_iter().collect(),
            busy: 0,
        }
    }

    pub fn next_instr(&mut self) -> Instr {
        if self.busy > 0 {
            self.busy -= 1;
            return Instr::Other;
        }
        loop {
            match self.ops.pop_front() {
                Some(TraceOp::Load(addr)) => return Instr::Read(addr),
                Some(TraceOp::Store(addr)) => return Instr::Write(addr),
                Some(TraceOp::Other(0)) => continue,
                Some(TraceOp::Other(n)) => {
                    self.busy = n - 1;
                    return Instr::Other;
                }
                None => return Instr::End,
            }
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.busy == 0 && self.ops.is_empty()
    }
}

fn parse_value(s: &str) -> Option<u32> {
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

/// parses the contents of one trace file
pub fn parse_trace(path: &Path, content: &str) -> Result<Trace, TraceError> {
    let malformed = |line: usize, reason: String| TraceError::Malformed {
        path: path.to_path_buf(),
        line,
        reason,
    };
    let mut ops = VecDeque::new();
    for (i, line) in content.lines().enumerate() {
        let lineno = i + 1;
        let mut parts = line.split_whitespace();
        let (Some(kind), Some(value)) = (parts.next(), parts.next()) else {
            if line.trim().is_empty() {
                continue;
            }
            return Err(malformed(lineno, format!("expected `<kind> <value>`, got `{line}`")));
        };
        let value = parse_value(value)
            .ok_or_else(|| malformed(lineno, format!("invalid value `{value}`")))?;
        ops.push_back(match kind {
            "0" => TraceOp::Load(Addr(value)),
            "1" => TraceOp::Store(Addr(value)),
            "2" => TraceOp::Other(value),
            _ => return Err(malformed(lineno, format!("invalid instruction kind `{kind}`"))),
        });
    }
    Ok(Trace { ops, busy: 0 })
}

pub fn trace_path(base: &Path, core: usize) -> PathBuf {
    let mut name = base.as_os_str().to_owned();
    name.push(format!("_{core}.data"));
    PathBuf::from(name)
}

/// reads `<base>_0.data` .. `<base>_<n-1>.data`, one stream per core
pub fn read_testfiles(base: &Path, n: usize) -> Result<Vec<Trace>, TraceError> {
    (0..n)
        .map(|core| {
            let path = trace_path(base, core);
            info!("reading file: {}", path.display());
            let content = fs::read_to_string(&path).map_err(|source| TraceError::Io {
                path: path.clone(),
                source,
            })?;
            parse_trace(&path, &content)
        })
        .collect()
}

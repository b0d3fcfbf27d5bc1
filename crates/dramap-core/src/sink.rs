//! Per-operation log sinks.
//!
//! Every pipeline operation writes its rows to its own
//! `<prefix>.<op>.log` file and, when verbose, echoes them through the
//! `log` facade. The registry is a per-instance value; there is no global
//! sink state.

use std::fmt::Arguments;
use std::fs::File;
use std::io::{BufWriter, Write};

use log::{info, warn};

/// Factory for per-operation sinks sharing one filename prefix.
#[derive(Debug, Clone)]
pub struct SinkRegistry {
    prefix: String,
    verbose: bool,
    logging: bool,
}

impl SinkRegistry {
    /// Creates a registry. `logging` enables the file halves, `verbose` the
    /// console echo.
    pub fn new(prefix: impl Into<String>, verbose: bool, logging: bool) -> Self {
        SinkRegistry {
            prefix: prefix.into(),
            verbose,
            logging,
        }
    }

    fn open_with_extension(&self, op: &str, extension: &str) -> OpSink {
        let file = if self.logging {
            let fname = format!("{}.{}.{}", self.prefix, op, extension);
            match File::create(&fname) {
                Ok(f) => Some(BufWriter::new(f)),
                Err(e) => {
                    warn!("cannot create sink file {fname}: {e}");
                    None
                }
            }
        } else {
            None
        };
        OpSink {
            file,
            verbose: self.verbose,
        }
    }

    /// Opens the `.log` sink for one operation.
    pub fn open(&self, op: &str) -> OpSink {
        self.open_with_extension(op, "log")
    }

    /// Opens a `.csv` sink for raw data dumps.
    pub fn open_csv(&self, op: &str) -> OpSink {
        self.open_with_extension(op, "csv")
    }
}

/// Line-oriented sink for a single operation.
pub struct OpSink {
    file: Option<BufWriter<File>>,
    verbose: bool,
}

impl OpSink {
    /// Writes one line, e.g. `sink.line(format_args!("idx,{}", idx))`.
    pub fn line(&mut self, args: Arguments<'_>) {
        if let Some(file) = &mut self.file {
            let _ = writeln!(file, "{args}");
        }
        if self.verbose {
            info!("{args}");
        }
    }
}

impl Drop for OpSink {
    fn drop(&mut self) {
        if let Some(file) = &mut self.file {
            let _ = file.flush();
        }
    }
}

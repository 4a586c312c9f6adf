// THEORY:
// The result log is the benchmark's only persistent output: a semicolon-separated
// text file with one header line and one line per measured combination.
//
// It is strictly append-only. Opening never truncates, so results of earlier,
// unrelated runs survive. The header is written once, on the first append to a file
// that was empty (or did not exist) when it was opened. Every line is flushed as soon
// as it is written, so a crash loses at most the combination that was in flight.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::info;

use crate::core_modules::kernel::{KernelVariant, PixelationAlgorithm};
use crate::error::LogError;

/// Header line naming the five record fields.
pub const HEADER: &str = "ThreadCount;Variant;Algorithm;Resolution;AvgTimeMs";

/// The averaged timing of one `(threads, variant, algorithm)` combination.
#[derive(Debug, Clone, PartialEq)]
pub struct BenchmarkResult {
    pub thread_count: usize,
    pub variant: KernelVariant,
    pub algorithm: PixelationAlgorithm,
    /// `"{width}x{height}"` of the benchmarked image.
    pub resolution: String,
    pub avg_time_ms: f64,
}

impl fmt::Display for BenchmarkResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{};{};{};{};{:.4}",
            self.thread_count, self.variant, self.algorithm, self.resolution, self.avg_time_ms
        )
    }
}

/// Append-only writer for `BenchmarkResult` lines.
#[derive(Debug)]
pub struct ResultLog {
    path: PathBuf,
    writer: BufWriter<File>,
    header_pending: bool,
}

impl ResultLog {
    /// Opens `path` for appending, creating it if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let open_error = |source| LogError::Open {
            path: path.clone(),
            source,
        };

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(open_error)?;
        let header_pending = file.metadata().map_err(open_error)?.len() == 0;

        Ok(Self {
            path,
            writer: BufWriter::new(file),
            header_pending,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one record, preceded by the header if this is the file's first line.
    pub fn append(&mut self, result: &BenchmarkResult) -> Result<(), LogError> {
        if self.header_pending {
            writeln!(self.writer, "{HEADER}")?;
            self.writer.flush()?;
            self.header_pending = false;
        }
        writeln!(self.writer, "{result}")?;
        self.writer.flush()?;
        info!("logged {result}");
        Ok(())
    }
}

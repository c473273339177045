//! External coverage tool session
//!
//! Drives a `coverage`-style command-line tool. The measured programs are run
//! by the tool itself (`coverage run -p ...`), which leaves data files in the
//! working directory; this session reports on, combines and erases them.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use tracing::{debug, info};

use super::{MeasurementError, MeasurementSession};

/// Base name of the tool's data file; parallel runs append `.<suffix>`
pub const DATA_FILE_NAME: &str = ".coverage";

/// Marker the tool prints when it has nothing to report
const NO_DATA_MARKER: &str = "No data to report";

/// Decimal places requested for the total; the tool rounds to whole
/// percents unless told otherwise
const TOTAL_PRECISION: &str = "--precision=6";

/// Session backed by an external coverage tool
///
/// Measurement happens in the suite command (`coverage run -p`), so
/// `start` and `stop` only track whether a measured region is open.
#[derive(Clone, Debug)]
pub struct CoverageTool {
    program: String,
    program_args: Vec<String>,
    rcfile: Option<PathBuf>,
    working_dir: PathBuf,
    running: bool,
}

impl CoverageTool {
    /// Create a session that runs `program` in the current directory
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            program_args: Vec::new(),
            rcfile: None,
            working_dir: PathBuf::from("."),
            running: false,
        }
    }

    /// Arguments placed before the subcommand (e.g. `-m coverage` for `python3`)
    #[must_use]
    pub fn with_program_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.program_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Pass `--rcfile <path>` to every tool invocation
    #[must_use]
    pub fn with_rcfile(mut self, rcfile: impl Into<PathBuf>) -> Self {
        self.rcfile = Some(rcfile.into());
        self
    }

    /// Run the tool (and look for data files) in `dir`
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = dir.into();
        self
    }

    /// Program name
    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// Directory holding the data files
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Whether `start` was called without a matching `stop`
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.running
    }

    fn invoke(&self, subcommand: &str, extra: &[&str]) -> Result<Output, MeasurementError> {
        let mut command = Command::new(&self.program);
        command
            .args(&self.program_args)
            .arg(subcommand)
            .current_dir(&self.working_dir);
        if let Some(rcfile) = &self.rcfile {
            command.arg("--rcfile").arg(rcfile);
        }
        command.args(extra);

        debug!(program = %self.program, subcommand, "Running coverage tool");
        let output = command.output()?;

        if output.status.success() {
            return Ok(output);
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stdout.contains(NO_DATA_MARKER) || stderr.contains(NO_DATA_MARKER) {
            return Err(MeasurementError::NoMeasurementData);
        }

        Err(MeasurementError::ToolFailed {
            program: format!("{} {}", self.program, subcommand),
            status: output.status.to_string(),
            stderr: stderr.trim().to_string(),
        })
    }

    fn total(&self) -> Result<f64, MeasurementError> {
        let output = self.invoke("report", &["--format=total", TOTAL_PRECISION])?;
        parse_total(&String::from_utf8_lossy(&output.stdout))
    }
}

impl MeasurementSession for CoverageTool {
    fn start(&mut self) -> Result<(), MeasurementError> {
        self.running = true;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), MeasurementError> {
        self.running = false;
        Ok(())
    }

    fn report(&mut self, out: &mut dyn Write, quiet: bool) -> Result<f64, MeasurementError> {
        if !quiet {
            let output = self.invoke("report", &[])?;
            out.write_all(&output.stdout)?;
            out.flush()?;
        }
        self.total()
    }

    fn html_report(&mut self) -> Result<f64, MeasurementError> {
        self.invoke("html", &[])?;
        self.total()
    }

    fn xml_report(&mut self) -> Result<f64, MeasurementError> {
        self.invoke("xml", &[])?;
        self.total()
    }

    fn combine(&mut self) -> Result<(), MeasurementError> {
        self.invoke("combine", &[])?;
        Ok(())
    }

    fn erase(&mut self) -> Result<(), MeasurementError> {
        for entry in fs::read_dir(&self.working_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if is_data_file(&name) && entry.file_type()?.is_file() {
                fs::remove_file(entry.path())?;
                info!(file = %name, "Removed stale coverage data");
            }
        }
        Ok(())
    }
}

/// `.coverage` itself or a parallel-mode `.coverage.<suffix>` file
fn is_data_file(name: &str) -> bool {
    name == DATA_FILE_NAME
        || name
            .strip_prefix(DATA_FILE_NAME)
            .is_some_and(|rest| rest.starts_with('.'))
}

/// Parse the tool's bare total (e.g. `"87.5"` or `"100%"`)
fn parse_total(output: &str) -> Result<f64, MeasurementError> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .last()
        .and_then(|line| line.trim_end_matches('%').parse::<f64>().ok())
        .ok_or_else(|| MeasurementError::UnparsableTotal {
            output: output.to_string(),
        })
}

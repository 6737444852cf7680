//! Textual firing-vector dumps.
//!
//! One line per timestep, one token per neuron: `1` for fired, `0` for
//! silent, each token followed by a single space. Identical seeds and
//! parameters reproduce a dump byte for byte.
//!
//! A protocol run writes four files:
//! - `levyneurons.txt` — every recorded step of every trial
//! - `earlytrain.txt` — the early training trial selected in the protocol
//! - `finaltrain.txt` — the last training trial
//! - `finaltest.txt` — the last testing trial

use crate::core::{NetError, NetResult};
use crate::training::{Phase, ProtocolConfig, StepEvent, StepObserver};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

pub const ALL_STEPS_FILE: &str = "levyneurons.txt";
pub const EARLY_TRAIN_FILE: &str = "earlytrain.txt";
pub const FINAL_TRAIN_FILE: &str = "finaltrain.txt";
pub const FINAL_TEST_FILE: &str = "finaltest.txt";

/// Render one firing vector as a dump line (without the newline).
pub fn format_firings(firings: &[bool]) -> String {
    let mut line = String::with_capacity(firings.len() * 2);
    for &fired in firings {
        line.push_str(if fired { "1 " } else { "0 " });
    }
    line
}

/// Parse a dump line back into a firing vector.
///
/// # Errors
/// - `Parse` if any whitespace-separated token is not `0` or `1`
pub fn parse_firing_line(line: &str) -> NetResult<Vec<bool>> {
    line.split_whitespace()
        .enumerate()
        .map(|(i, token)| match token {
            "1" => Ok(true),
            "0" => Ok(false),
            other => Err(NetError::Parse(format!(
                "token {} is {:?}, expected 0 or 1",
                i, other
            ))),
        })
        .collect()
}

/// Line-oriented writer of firing vectors.
#[derive(Debug)]
pub struct FiringWriter<W: Write> {
    inner: W,
    lines: usize,
}

impl<W: Write> FiringWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, lines: 0 }
    }

    /// Append one timestep.
    pub fn write_firings(&mut self, firings: &[bool]) -> NetResult<()> {
        writeln!(self.inner, "{}", format_firings(firings))?;
        self.lines += 1;
        Ok(())
    }

    /// Number of lines written so far.
    pub fn lines(&self) -> usize {
        self.lines
    }

    pub fn flush(&mut self) -> NetResult<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

type FileWriter = FiringWriter<BufWriter<File>>;

fn create(dir: &Path, name: &str) -> NetResult<FileWriter> {
    let file = File::create(dir.join(name))
        .map_err(|e| NetError::Output(format!("{}: {}", dir.join(name).display(), e)))?;
    Ok(FiringWriter::new(BufWriter::new(file)))
}

/// The four dump files of a training/testing run.
#[derive(Debug)]
pub struct FiringFiles {
    all: FileWriter,
    early_train: FileWriter,
    final_train: FileWriter,
    final_test: FileWriter,
    early_trial: usize,
    last_training_trial: Option<usize>,
    last_testing_trial: Option<usize>,
}

impl FiringFiles {
    /// Create (truncating) the dump files inside `dir`.
    ///
    /// # Errors
    /// - `Output` if any file cannot be created
    pub fn create(dir: &Path, protocol: &ProtocolConfig) -> NetResult<Self> {
        Ok(Self {
            all: create(dir, ALL_STEPS_FILE)?,
            early_train: create(dir, EARLY_TRAIN_FILE)?,
            final_train: create(dir, FINAL_TRAIN_FILE)?,
            final_test: create(dir, FINAL_TEST_FILE)?,
            early_trial: protocol.early_trial_to_save,
            last_training_trial: protocol.training_trials.checked_sub(1),
            last_testing_trial: protocol.testing_trials.checked_sub(1),
        })
    }

    /// Line counts: (all, early train, final train, final test).
    pub fn line_counts(&self) -> (usize, usize, usize, usize) {
        (
            self.all.lines(),
            self.early_train.lines(),
            self.final_train.lines(),
            self.final_test.lines(),
        )
    }

    pub fn flush(&mut self) -> NetResult<()> {
        self.all.flush()?;
        self.early_train.flush()?;
        self.final_train.flush()?;
        self.final_test.flush()
    }
}

impl StepObserver for FiringFiles {
    fn observe(&mut self, event: &StepEvent<'_>) -> NetResult<()> {
        self.all.write_firings(event.firings)?;
        match event.phase {
            Phase::Training => {
                if event.trial == self.early_trial {
                    self.early_train.write_firings(event.firings)?;
                }
                if Some(event.trial) == self.last_training_trial {
                    self.final_train.write_firings(event.firings)?;
                }
            }
            Phase::Testing => {
                if Some(event.trial) == self.last_testing_trial {
                    self.final_test.write_firings(event.firings)?;
                }
            }
            Phase::FreeRun => {}
        }
        Ok(())
    }
}

impl<W: Write> StepObserver for FiringWriter<W> {
    fn observe(&mut self, event: &StepEvent<'_>) -> NetResult<()> {
        self.write_firings(event.firings)
    }
}

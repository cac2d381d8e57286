use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::BatchError;

use super::{
    build_name,
    item::{ItemProcessor, ItemReader, ItemWriter},
};

/// Status of a step execution.
///
/// A step moves from `Pending` to `Running` and ends either `Completed` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "PENDING",
            StepStatus::Running => "RUNNING",
            StepStatus::Completed => "COMPLETED",
            StepStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StepStatus {
    type Err = BatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(StepStatus::Pending),
            "RUNNING" => Ok(StepStatus::Running),
            "COMPLETED" => Ok(StepStatus::Completed),
            "FAILED" => Ok(StepStatus::Failed),
            other => Err(BatchError::Configuration(format!(
                "unknown step status: {}",
                other
            ))),
        }
    }
}

/// Execution details of one step: status, timing and item counters.
///
/// Only the counters survive a run; the items themselves are never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepExecution {
    /// Unique identifier for this step execution
    pub id: Uuid,
    /// Name of the step
    pub name: String,
    pub status: StepStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    /// Number of items pulled from the reader, including the ones that failed to read
    pub read_count: usize,
    /// Number of items committed by the writer
    pub write_count: usize,
    /// Number of items skipped because they could not be read
    pub read_skip_count: usize,
    /// Number of items skipped because the processor rejected them
    pub process_skip_count: usize,
    /// Number of items the processor filtered out
    pub filter_count: usize,
    /// Number of committed chunks
    pub commit_count: usize,
    /// Number of chunks rolled back
    pub rollback_count: usize,
    /// Input items consumed up to the last commit, counted from the start of
    /// the input across restarts. A restart resumes reading after them.
    #[serde(default)]
    pub commit_position: usize,
    pub exit_description: String,
}

impl StepExecution {
    pub fn new(name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            status: StepStatus::Pending,
            start_time: None,
            end_time: None,
            read_count: 0,
            write_count: 0,
            read_skip_count: 0,
            process_skip_count: 0,
            filter_count: 0,
            commit_count: 0,
            rollback_count: 0,
            commit_position: 0,
            exit_description: String::new(),
        }
    }

    /// A new execution resuming where `previous` last committed.
    pub fn restart_of(previous: &StepExecution) -> Self {
        Self {
            commit_position: previous.commit_position,
            ..Self::new(&previous.name)
        }
    }

    /// Total number of skipped items.
    pub fn skip_count(&self) -> usize {
        self.read_skip_count + self.process_skip_count
    }

    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.start_time, self.end_time) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}

/// A sequential phase of a job.
pub trait Step {
    fn get_name(&self) -> &str;

    /// Executes the step, recording status and counters into `step_execution`.
    ///
    /// # Returns
    /// - `Ok(())`: the step completed
    /// - `Err(BatchError::Step)`: the step failed, details are in `step_execution`
    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError>;
}

/// A step reading, processing and writing items in chunks.
///
/// Each chunk is handed to the writer as a whole, so a chunk is either fully
/// committed or not written at all. Chunks committed before a failure stay
/// committed.
pub struct ChunkOrientedStep<'a, I, O> {
    name: String,
    reader: &'a dyn ItemReader<I>,
    processor: &'a dyn ItemProcessor<I, O>,
    writer: &'a dyn ItemWriter<O>,
    /// Number of items written per transaction
    chunk_size: usize,
    /// Maximum number of item-level errors tolerated
    skip_limit: usize,
}

impl<I, O> Step for ChunkOrientedStep<'_, I, O> {
    fn get_name(&self) -> &str {
        &self.name
    }

    fn execute(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        step_execution.start_time = Some(Utc::now());
        step_execution.status = StepStatus::Running;

        info!("Start of step: {}, id: {}", self.name, step_execution.id);

        let result = self
            .open_streams()
            .and_then(|()| self.run_chunks(step_execution));

        // Resources are released whatever the outcome
        self.close_streams();

        step_execution.end_time = Some(Utc::now());

        match result {
            Ok(()) => {
                step_execution.status = StepStatus::Completed;
                step_execution.exit_description = StepStatus::Completed.to_string();
                info!(
                    "End of step: {}, id: {}, read: {}, written: {}, skipped: {}, filtered: {}",
                    self.name,
                    step_execution.id,
                    step_execution.read_count,
                    step_execution.write_count,
                    step_execution.skip_count(),
                    step_execution.filter_count
                );
                Ok(())
            }
            Err(err) => {
                step_execution.status = StepStatus::Failed;
                step_execution.exit_description = err.to_string();
                error!(
                    "Step {} failed after {} committed items: {}",
                    self.name, step_execution.write_count, err
                );
                Err(BatchError::Step(self.name.clone()))
            }
        }
    }
}

impl<I, O> ChunkOrientedStep<'_, I, O> {
    fn open_streams(&self) -> Result<(), BatchError> {
        self.reader.open()?;
        self.writer.open()
    }

    fn close_streams(&self) {
        if let Err(err) = self.reader.close() {
            warn!("Unable to close reader of step {}: {}", self.name, err);
        }
        if let Err(err) = self.writer.close() {
            warn!("Unable to close writer of step {}: {}", self.name, err);
        }
    }

    /// Reads past the items a previous execution already committed.
    fn skip_committed(&self, count: usize) -> Result<(), BatchError> {
        if count > 0 {
            info!("Step {} resumes after {} committed items", self.name, count);
        }
        for _ in 0..count {
            match self.reader.read() {
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(err) if err.is_skippable() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    fn run_chunks(&self, step_execution: &mut StepExecution) -> Result<(), BatchError> {
        let mut chunk: Vec<O> = Vec::with_capacity(self.chunk_size);
        self.skip_committed(step_execution.commit_position)?;
        let mut position = step_execution.commit_position;

        loop {
            match self.reader.read() {
                Ok(Some(item)) => {
                    step_execution.read_count += 1;
                    position += 1;

                    match self.processor.process(&item) {
                        Ok(Some(processed)) => chunk.push(processed),
                        Ok(None) => step_execution.filter_count += 1,
                        Err(err) => {
                            step_execution.process_skip_count += 1;
                            self.check_skip_limit(step_execution, err)?;
                        }
                    }
                }
                Ok(None) => {
                    debug!("End of input for step {}", self.name);
                    if !chunk.is_empty() {
                        self.write_chunk(step_execution, &mut chunk)?;
                    }
                    step_execution.commit_position = position;
                    return Ok(());
                }
                Err(err) => {
                    if err.is_skippable() {
                        step_execution.read_count += 1;
                        step_execution.read_skip_count += 1;
                        position += 1;
                    }
                    self.check_skip_limit(step_execution, err)?;
                }
            }

            if chunk.len() >= self.chunk_size {
                self.write_chunk(step_execution, &mut chunk)?;
                step_execution.commit_position = position;
            }
        }
    }

    /// Lets an item-level error through while the skip limit holds.
    fn check_skip_limit(
        &self,
        step_execution: &StepExecution,
        err: BatchError,
    ) -> Result<(), BatchError> {
        if !err.is_skippable() {
            return Err(err);
        }

        if step_execution.skip_count() > self.skip_limit {
            error!(
                "Skip limit of {} exceeded in step {}",
                self.skip_limit, self.name
            );
            return Err(err);
        }

        warn!("Skipping item in step {}: {}", self.name, err);
        Ok(())
    }

    fn write_chunk(
        &self,
        step_execution: &mut StepExecution,
        chunk: &mut Vec<O>,
    ) -> Result<(), BatchError> {
        debug!("Writing chunk of {} items", chunk.len());

        let result = self.writer.write(chunk).and_then(|()| self.writer.flush());
        let size = chunk.len();
        chunk.clear();

        match result {
            Ok(()) => {
                step_execution.write_count += size;
                step_execution.commit_count += 1;
                debug!("Chunk committed, {} items written so far", step_execution.write_count);
                Ok(())
            }
            Err(err) => {
                step_execution.rollback_count += 1;
                error!("Chunk of {} items rolled back: {}", size, err);
                Err(err)
            }
        }
    }
}

/// Entry point for building a step.
///
/// # Example
///
/// ```rust,no_run,compile_fail
/// let step = StepBuilder::new("step1")
///     .chunk::<Person, Person>(10)
///     .reader(&reader)
///     .processor(&processor)
///     .writer(&writer)
///     .skip_limit(2)
///     .build()?;
/// ```
pub struct StepBuilder {
    name: String,
}

impl StepBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }

    /// Starts a chunk-oriented step committing every `chunk_size` items.
    pub fn chunk<'a, I, O>(self, chunk_size: usize) -> ChunkOrientedStepBuilder<'a, I, O> {
        ChunkOrientedStepBuilder::new(&self.name).chunk_size(chunk_size)
    }
}

impl Default for StepBuilder {
    fn default() -> Self {
        Self::new(&build_name())
    }
}

pub struct ChunkOrientedStepBuilder<'a, I, O> {
    name: String,
    reader: Option<&'a dyn ItemReader<I>>,
    processor: Option<&'a dyn ItemProcessor<I, O>>,
    writer: Option<&'a dyn ItemWriter<O>>,
    chunk_size: usize,
    skip_limit: usize,
}

impl<'a, I, O> ChunkOrientedStepBuilder<'a, I, O> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            reader: None,
            processor: None,
            writer: None,
            chunk_size: 10,
            skip_limit: 0,
        }
    }

    pub fn reader(mut self, reader: &'a dyn ItemReader<I>) -> Self {
        self.reader = Some(reader);
        self
    }

    pub fn processor(mut self, processor: &'a dyn ItemProcessor<I, O>) -> Self {
        self.processor = Some(processor);
        self
    }

    pub fn writer(mut self, writer: &'a dyn ItemWriter<O>) -> Self {
        self.writer = Some(writer);
        self
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn skip_limit(mut self, skip_limit: usize) -> Self {
        self.skip_limit = skip_limit;
        self
    }

    /// Builds the step.
    ///
    /// # Errors
    /// `BatchError::Configuration` when the reader, processor or writer is
    /// missing, or when the chunk size is zero.
    pub fn build(self) -> Result<ChunkOrientedStep<'a, I, O>, BatchError> {
        if self.chunk_size == 0 {
            return Err(BatchError::Configuration(format!(
                "chunk size of step {} must be at least 1",
                self.name
            )));
        }

        let missing = |component: &str| {
            BatchError::Configuration(format!(
                "{} is required for building step {}",
                component, self.name
            ))
        };

        Ok(ChunkOrientedStep {
            reader: self.reader.ok_or_else(|| missing("Reader"))?,
            processor: self.processor.ok_or_else(|| missing("Processor"))?,
            writer: self.writer.ok_or_else(|| missing("Writer"))?,
            chunk_size: self.chunk_size,
            skip_limit: self.skip_limit,
            name: self.name,
        })
    }
}

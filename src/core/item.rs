use crate::error::BatchError;

/// Result of reading one item: `Ok(None)` marks the end of the input.
pub type ItemReaderResult<I> = Result<Option<I>, BatchError>;

/// Result of processing one item: `Ok(None)` filters the item out of the chunk.
pub type ItemProcessorResult<O> = Result<Option<O>, BatchError>;

/// Result of writing a chunk of items.
pub type ItemWriterResult = Result<(), BatchError>;

/// Retrieval of the input of a step, one item at a time.
///
/// A reader owns a resource (a file handle, a cursor) for the lifetime of one
/// step execution. The step calls [`ItemReader::open`] before the first read and
/// [`ItemReader::close`] on every exit path.
pub trait ItemReader<I> {
    /// Reads the next item.
    ///
    /// # Returns
    /// - `Ok(Some(item))` when an item has been read
    /// - `Ok(None)` when the input is exhausted
    /// - `Err(BatchError)` when the current item cannot be read; the reader
    ///   stays usable and the next call moves on to the following item
    fn read(&self) -> ItemReaderResult<I>;

    fn open(&self) -> Result<(), BatchError> {
        Ok(())
    }

    fn close(&self) -> Result<(), BatchError> {
        Ok(())
    }
}

/// Business logic applied to every item between reading and writing.
///
/// Implementations must not keep mutable state between calls.
pub trait ItemProcessor<I, O> {
    /// Transforms an item.
    ///
    /// # Returns
    /// - `Ok(Some(item))` to keep the (transformed) item
    /// - `Ok(None)` to filter the item out
    /// - `Err(BatchError)` when the item violates a business rule
    fn process(&self, item: &I) -> ItemProcessorResult<O>;
}

/// Output of a step, one chunk of items at a time.
pub trait ItemWriter<O> {
    /// Writes a whole chunk. Either every item of `items` is persisted, or none.
    fn write(&self, items: &[O]) -> ItemWriterResult;

    fn flush(&self) -> ItemWriterResult {
        Ok(())
    }

    fn open(&self) -> ItemWriterResult {
        Ok(())
    }

    fn close(&self) -> ItemWriterResult {
        Ok(())
    }
}

/// Identity processor, used by a step when no processor is configured.
#[derive(Default)]
pub struct PassThroughProcessor;

impl<T: Clone> ItemProcessor<T, T> for PassThroughProcessor {
    fn process(&self, item: &T) -> ItemProcessorResult<T> {
        Ok(Some(item.clone()))
    }
}

use std::future::Future;
use std::sync::Arc;

use tracing::{debug, warn};

use super::report::ErrorRecord;
use crate::flow::types::ErrorReporter;

/// Wraps every invocation of a stage operation.
///
/// A failure is turned into an [`ErrorRecord`], handed to the reporter and the
/// run's collector, and the original item is returned in `Err` so the stage
/// can apply its failure policy. Nothing escapes to the stage itself.
pub(crate) struct Isolation<DataType, ErrorType> {
    stage: Arc<str>,
    retries: usize,
    reporter: Option<ErrorReporter<DataType, ErrorType>>,
    records: flume::Sender<ErrorRecord<DataType, ErrorType>>,
}

impl<DataType, ErrorType> Isolation<DataType, ErrorType>
where
    DataType: Clone,
    ErrorType: std::error::Error,
{
    pub(crate) fn new(
        stage: Arc<str>,
        retries: usize,
        reporter: Option<ErrorReporter<DataType, ErrorType>>,
        records: flume::Sender<ErrorRecord<DataType, ErrorType>>,
    ) -> Self {
        Self {
            stage,
            retries,
            reporter,
            records,
        }
    }

    pub(crate) async fn call<T, F, Fut>(&self, item: DataType, mut operation: F) -> Result<T, DataType>
    where
        F: FnMut(DataType) -> Fut,
        Fut: Future<Output = Result<T, ErrorType>>,
    {
        let mut attempt = 0;
        loop {
            attempt += 1;
            match operation(item.clone()).await {
                Ok(output) => return Ok(output),
                Err(error) => {
                    self.report(ErrorRecord {
                        stage: self.stage.to_string(),
                        item: item.clone(),
                        error,
                        attempt,
                    });
                    if attempt > self.retries {
                        return Err(item);
                    }
                    debug!(stage = %self.stage, attempt, "Retrying failed item");
                }
            }
        }
    }

    fn report(&self, record: ErrorRecord<DataType, ErrorType>) {
        warn!(
            stage = %self.stage,
            attempt = record.attempt,
            "Item failed: {}",
            record.error
        );
        if let Some(reporter) = &self.reporter {
            reporter(&record);
        }
        if self.records.send(record).is_err() {
            debug!(stage = %self.stage, "Error collector already gone");
        }
    }
}

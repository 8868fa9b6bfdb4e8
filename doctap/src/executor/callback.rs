use tracing::Span;

use crate::error::TapResult;
use crate::executor::buffer::OperationsBuffer;
use crate::metrics::Metrics;

/// Hook invoked at the start of every non-empty flush, before the storage transaction is opened.
///
/// Callbacks run in registration order. Operations appended to the buffer are committed with the
/// rest of the batch. Returning an error aborts the flush and leaves the buffer in place.
///
/// Closures with the matching signature implement this trait.
pub trait PreTransactionCallback {
    fn execute(
        &self,
        buffer: &mut OperationsBuffer,
        metrics: &Metrics,
        span: &Span,
    ) -> TapResult<()>;
}

/// A type-erased callback as stored by the executor.
pub type BoxedPreTransactionCallback = Box<dyn PreTransactionCallback + Send + Sync>;

impl<F> PreTransactionCallback for F
where
    F: Fn(&mut OperationsBuffer, &Metrics, &Span) -> TapResult<()>,
{
    fn execute(
        &self,
        buffer: &mut OperationsBuffer,
        metrics: &Metrics,
        span: &Span,
    ) -> TapResult<()> {
        self(buffer, metrics, span)
    }
}

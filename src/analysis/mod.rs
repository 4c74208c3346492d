//! Running the analysis prompt over uploaded documents.
//!
//! [`AnalysisInvoker`] makes one paced, retried call per document.
//! [`BatchJobMonitor`] and the helpers in [`batch`] submit every document as a
//! single asynchronous job instead.

pub mod batch;
mod invoker;

pub use batch::{
    build_batch_requests, records_from_batch, submit_batch, write_jsonl, BatchError,
    BatchJobMonitor, BatchRequest, SubmittedBatch,
};
pub use invoker::{AnalysisError, AnalysisInvoker};

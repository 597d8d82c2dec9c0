pub mod log;
pub mod processor;
pub mod store;

pub use log::{LogBatchWriter, LogReader, LogStream};
pub use processor::{FollowUpWriter, RecordProcessor, RecordProcessorMap};
pub use store::{StateStore, StateTxn, StateTxnExt};

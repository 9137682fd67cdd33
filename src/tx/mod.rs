//! Transaction lifecycle and gas handling

pub mod gas;
pub mod lifecycle;

pub use gas::GasEstimator;
pub use lifecycle::{
    ReceiptLog, SubmissionEvent, SubmissionFeed, SubmissionHandle, SubmissionStage, TxReceipt,
};

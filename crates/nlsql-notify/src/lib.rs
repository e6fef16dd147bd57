//! Fan-out of pending non-SQL answers to presenters.

pub mod flow;
pub mod presenters;

pub use flow::NonSqlNotifyFlow;
pub use presenters::{JsonLinesPresenter, LogPresenter};

pub mod boundaries;
pub mod config;
pub mod error;
pub mod types;

pub use boundaries::{
    Llm, MetadataStore, NonSqlAnswerRepo, NonSqlPresenter, NotifyFlow, QueryFlowListener,
    SessionStore, ToolRepository,
};
pub use config::NlsqlConfig;
pub use error::{FlowError, Result};
pub use types::*;

pub mod gmail;
pub mod graph;
pub mod mime;
pub mod provider;

pub use gmail::GmailProvider;
pub use graph::GraphMailProvider;
pub use provider::{DraftRequest, MailProvider};

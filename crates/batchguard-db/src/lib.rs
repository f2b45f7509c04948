pub mod audit;
pub mod connection;
pub mod error;
pub mod issuer;
pub mod models;
pub mod notice;

// Re-exports
pub use audit::AuditDatabase;
pub use connection::{connect, connect_options, ConnectionSettings};
pub use error::{Error, Result};
pub use issuer::IssuerDatabase;
pub use notice::{NoticeLayer, NoticeSink, NOTICE_TARGET};

//! Persistence models.

mod audit_log;
mod dead_letter;
mod message;

pub use audit_log::{
    AuditEventType, AuditLog, AuditLogBuilder, AuditLogFilter, AuditLogStats,
};
pub use dead_letter::{DeadLetterMessage, NewDeadLetter};
pub use message::{Message, MessageStatus, NewMessage};

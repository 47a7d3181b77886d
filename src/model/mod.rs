//! Registry data model.
//!
//! - [`source`] - Record origins and logical/exact source matching
//! - [`instance`] - Instance records, statuses and field deltas
//! - [`application`] - Application and applications views
//! - [`notification`] - Change notifications

pub mod application;
pub mod instance;
pub mod notification;
pub mod source;

pub use application::{Application, Applications};
pub use instance::{ActionType, Delta, InstanceRecord, InstanceStatus};
pub use notification::{ChangeKind, ChangeNotification};
pub use source::{LogicalSource, Origin, Source};

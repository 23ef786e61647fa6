//! Domain model (ids, status, records, events, errors).

pub mod errors;
pub mod events;
pub mod ids;
pub mod record;
pub mod state;

pub use self::errors::SpoolError;
pub use self::events::TaskEvent;
pub use self::ids::TaskId;
pub use self::record::StatusRecord;
pub use self::state::{FailureKind, TaskStatus};

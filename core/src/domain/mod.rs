mod evidence;
mod event;
mod id;
mod queue_item;
mod session;
mod task;
mod verified_file;

pub use evidence::EvidenceRecord;
pub use event::{EventRecord, EventSource};
pub use id::{new_id, IdKind};
pub use queue_item::{Clarification, ClarificationType, QueueItem};
pub use session::{ProjectMode, Session, SessionStatus};
pub use task::{Task, TaskState, TaskType};
pub use verified_file::{DetectionMethod, VerifiedFile};

pub use forgebench_store::{Filter, FilterOp, IndexValue, Record, Store};

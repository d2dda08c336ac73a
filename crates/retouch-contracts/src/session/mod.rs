mod snapshot;
mod state;

pub use snapshot::{SessionPhase, SessionSnapshot, SessionStatus};
pub use state::{Completion, RequestKind, Session, Ticket, TransformDispatch};

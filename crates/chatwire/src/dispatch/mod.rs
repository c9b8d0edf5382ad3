//! Message dispatch: send through a session, persist, track delivery status.

mod dispatcher;
mod lookup;
mod record;
mod status;

pub use dispatcher::{DispatchError, MessageDispatcher};
pub use lookup::{ConnectionLookup, SessionLookup};
pub use record::MessageRecord;
pub use status::MessageStatus;

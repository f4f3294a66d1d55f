// Session state machine
//
// model      : session, message and settings types
// history    : append/reload store behind a trait
// permissions: permission-mode policy applied before asking the user
// events     : UI events and the sink they are pushed through
// controller : the per-window lifecycle and turn consumer

mod controller;
mod events;
mod history;
mod model;
mod permissions;

pub use controller::{SessionController, SessionOptions, SessionServices};
pub use events::{StatusLevel, UiEvent, UiSink, UiUpdateSink};
pub use history::{HistoryStore, JsonlHistoryStore};
pub use model::{Message, PermissionMode, Role, SequenceCounter, Session, SessionSettings};
pub use permissions::{check_request, PermissionCheck};

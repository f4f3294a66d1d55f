// Switchboard - coordination core between host windows, agent worker
// subprocesses and an embedded chat UI
// Library exports

pub mod config;
pub mod decision;
pub mod dispatch;
pub mod error;
pub mod host;
pub mod protocol;
pub mod session;
pub mod streaming;
pub mod worker;

pub use error::{Error, Result};

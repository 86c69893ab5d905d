mod config;
mod events;
#[allow(clippy::module_inception)]
mod session;

pub use config::SessionConfig;
pub use events::SessionEvent;
pub use session::{Role, Session, SessionError};

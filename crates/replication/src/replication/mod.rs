mod manager;
mod waitlist;

pub use manager::{ReplicationError, ReplicationManager, ReplicationStats};
pub use waitlist::{DEFAULT_WAITLIST_TTL, EntityWaitlist, ParkedRecords};

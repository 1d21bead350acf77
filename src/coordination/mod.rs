// Agent coordination components: registry, claims, announcements, messaging

mod board;
mod bus;
mod claims;
mod registry;

pub use board::{
    AnnounceOptions, AnnounceOutcome, AnnouncementBoard, CollaborationMode,
    CollaborationSuggestion, ConflictRisk, OverlapKind, WorkOverlap,
};
pub use bus::MessageBus;
pub use claims::ClaimStore;
pub use registry::AgentRegistry;

use crate::database::Database;
use std::sync::{Arc, Mutex};

/// The embedded store shared by all components (and, through the file on
/// disk, by cooperating agent processes)
pub type SharedDatabase = Arc<Mutex<Database>>;

mod errors;
pub use errors::{CoordinationError, Result};

mod store;
pub use store::{join_path, CoordinationService, LockHandle, Versioned};

mod watch;
pub use watch::{WatchEvent, WatchStream};

mod memory_store;
pub use memory_store::MemoryCoordinator;

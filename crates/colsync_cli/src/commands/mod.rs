//! CLI command implementations.

pub mod inspect;
pub mod reset;
pub mod simulate;

use colsync_engine::{HISTORY_COLLECTION, LOGINS_COLLECTION};

/// Collections the CLI knows how to report on.
pub const KNOWN_COLLECTIONS: [&str; 2] = [HISTORY_COLLECTION, LOGINS_COLLECTION];

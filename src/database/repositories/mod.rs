pub mod config;
pub mod group;
pub mod photo;
pub mod session;

pub use config::ConfigRepository;
pub use group::GroupRepository;
pub use photo::PhotoRepository;
pub use session::SessionRepository;

use super::DatabaseError;
use rusqlite::{Connection, Transaction};

pub trait Repository {
    fn connection(&self) -> &Connection;

    /// Repositories borrow the shared connection, so transactions are opened
    /// unchecked; callers never nest them.
    fn transaction(&self) -> Result<Transaction<'_>, DatabaseError> {
        Ok(self.connection().unchecked_transaction()?)
    }
}

/// `?1, ?2, ...` placeholder list for an `IN (...)` clause.
pub(crate) fn placeholders(count: usize, offset: usize) -> String {
    (1..=count)
        .map(|i| format!("?{}", i + offset))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholders() {
        assert_eq!(placeholders(3, 0), "?1, ?2, ?3");
        assert_eq!(placeholders(2, 1), "?2, ?3");
        assert_eq!(placeholders(0, 0), "");
    }
}

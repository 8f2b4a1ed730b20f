pub mod models;
pub mod repository;

pub use repository::{
    ConnectionRepository, EventRepository, MessageRepository, PostRepository, ProfileRepository,
    PromotionRepository, SettingsRepository, TaskRepository,
};

/// True when `err` is a UNIQUE / PRIMARY KEY violation.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

pub mod connection;
pub mod event;
pub mod message;
pub mod post;
pub mod profile;
pub mod settings;
pub mod task;

pub use connection::ConnectionRepository;
pub use event::EventRepository;
pub use message::MessageRepository;
pub use post::{PostRepository, PromotionRepository};
pub use profile::ProfileRepository;
pub use settings::SettingsRepository;
pub use task::TaskRepository;

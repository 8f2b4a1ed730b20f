pub mod auth;
pub mod connections;
pub mod events;
pub mod functions;
pub mod health;
pub mod messages;
pub mod posts;
pub mod profile;
pub mod settings;
pub mod tasks;

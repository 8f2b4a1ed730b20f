pub mod assignments;
pub mod auth;
pub mod calendar;
pub mod canvas;
pub mod feeds;
pub mod google;
pub mod http;
pub mod init;
pub mod reconcile;
pub mod schedule_scan;
pub mod social;
pub mod tasks;

#![allow(unused_imports)]

//! Database models split into separate files.
//! This module re-exports individual model modules so imports like
//! `use crate::db::models::*;` work.

pub mod calendar;
pub mod profile;
pub mod settings;
pub mod social;
pub mod task;

pub use self::calendar::*;
pub use self::profile::*;
pub use self::settings::*;
pub use self::social::*;
pub use self::task::*;

//! Core of a dual-pane local/remote file manager: working-directory
//! tracking, twin local/SFTP backends sharing one outcome vocabulary,
//! a transfer engine covering every source/target combination, and a
//! one-shot background worker with cooperative cancellation. The
//! presentation layer consumes this API and renders its results.

pub mod config;
pub mod error;
pub mod path_model;
pub mod services;
pub mod status;

pub use error::SessionError;
pub use path_model::PathModel;
pub use status::{AuthResult, FileStatus, TrustChoice};

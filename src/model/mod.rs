pub mod config;
pub mod delta;
pub mod note;

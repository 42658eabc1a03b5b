pub mod alert;
pub mod config;
pub mod host;
pub mod simulate;
pub mod wake;

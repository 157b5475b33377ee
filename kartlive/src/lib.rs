pub mod board;
pub mod config;
pub mod feed;
pub mod timing;

pub use board::{Board, Session, SessionEvent};
pub use config::Settings;

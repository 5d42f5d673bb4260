pub mod api;
pub mod config;
pub mod error;
pub mod media;
pub mod rooms;
pub mod state;
pub mod ws;

pub use config::Config;
pub use error::{AppError, Result};
pub use state::AppState;

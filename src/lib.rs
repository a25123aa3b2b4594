pub mod config;
pub mod direct;
pub mod transport;

pub use config::Config;
pub use direct::{DirectClient, DirectError, DirectEvent};

pub mod api;
pub mod cache;
pub mod config;
pub mod error;
pub mod observability;
pub mod protocol;
pub mod provider;
pub mod relay;
pub mod routing;
pub mod state;
pub mod stream;
pub mod title;

mod util;

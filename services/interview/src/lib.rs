pub mod config;
pub mod dispatcher;
pub mod error;
pub mod prompt_loader;
pub mod routes;
pub mod voice_adapter;

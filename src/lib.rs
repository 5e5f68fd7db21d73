pub mod backends;
pub mod chat;
pub mod config_loader;
pub mod engine;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod playback;
pub mod queue;
pub mod text;
pub mod voice_config;

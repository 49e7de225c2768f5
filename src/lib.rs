// spriggan: sprite sheet runtime and Aseprite conversion pipeline

pub mod config;
pub mod core;
pub mod engine;
pub mod pipeline;

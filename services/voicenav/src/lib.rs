pub mod audio_adapter;
pub mod config;
pub mod gemini_adapter;
pub mod instructions;

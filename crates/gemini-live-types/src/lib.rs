//! Wire types of the Gemini Live bidirectional streaming protocol.

pub mod client;
pub mod content;
pub mod server;
pub mod tools;

// most used types at the crate root
pub use client::{ClientMessage, Setup};
pub use content::{Blob, Content, Part};
pub use server::ServerMessage;
pub use tools::{FunctionDeclaration, Tool};

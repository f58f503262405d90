//! # Audio Socket Relay
//!
//! Realtime audio relay: clients stream binary audio chunks over a WebSocket, the
//! server converts each chunk to 16 kHz mono WAV, sends it to a speech-to-text backend
//! and answers with the recognised text on the same connection.
//!
//! ## Application Architecture:
//! - **audio**: format detection and transcoding to the canonical format
//! - **transcription**: backend trait, OpenAI-compatible and static backends, bounded client
//! - **session**: live-connection registry and the per-chunk pipeline
//! - **websocket**: the per-connection actor and the `/ws` upgrade handler
//! - **config / state / error**: configuration, shared state, HTTP error responses
//! - **health / handlers / middleware / routes**: the HTTP surface

pub mod audio;          // Format detection and transcoding
pub mod config;         // Configuration management
pub mod error;          // Error handling types
pub mod handlers;       // Config and static asset handlers
pub mod health;         // Health, metrics and connection listing
pub mod middleware;     // Request metrics
pub mod routes;         // Route table
pub mod session;        // Registry and chunk pipeline
pub mod state;          // Shared application state
pub mod transcription;  // Speech-to-text backends
pub mod websocket;      // WebSocket actor

pub use config::AppConfig;
pub use state::AppState;

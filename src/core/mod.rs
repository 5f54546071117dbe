/// Runtime plumbing shared by the library and the CLI
///
/// - Message bus between callers, the reader thread and the engine thread
/// - The engine thread loop
/// - Telegram trace
/// - Helper utilities
pub mod bus;
pub mod helpers;
pub mod logs;
pub mod runtime;

// Re-export commonly used types
pub use bus::{BusEvent, ChannelHook, EngineCommand};
pub use logs::{LogBuffer, LogEntry, LogLevel, LogMetadata};
pub use runtime::{run_engine_loop, RuntimeConfig};

pub mod adapter;
pub mod claude;
pub mod codex;
pub mod events;
pub mod hook;
pub mod session;
mod supervisor;
pub mod transcript;

pub use adapter::{AdapterError, AdapterRegistry, AgentAdapter, TranscriptMessage};
pub use events::{now_ms, AgentEvent, ContentBlock, EventKind, ProcessedEvent, TerminalInfo};
pub use hook::HookDecoder;
pub use session::{Session, SessionKind, SessionStatus};
pub use supervisor::{
    CreateOptions, ListFilter, SessionSignal, SessionSupervisor, SupervisorConfig, SupervisorError,
};
pub use transcript::{TranscriptReader, TranscriptUpdate};

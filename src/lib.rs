//! # DeepAgent
//!
//! An agentic LLM orchestration runtime: a server that drives a chat model
//! through iterative tool-call cycles until it emits a terminal response,
//! persisting conversational state between transitions and transparently
//! compacting oversized tool outputs so conversations fit within model
//! context windows.
//!
//! ## Architecture
//!
//! - **Agent** (`agent`): the loop state machine, its checkpointed state,
//!   the chat provider abstraction, and the session facade
//! - **Compaction** (`compaction`): schema discovery and map-reduce
//!   summarization over chunked tool outputs
//! - **Tools** (`tools`): the tool trait, the registry, and unified
//!   action-dispatched tools derived from datasources
//! - **Datasources** (`datasource`): external APIs surfaced as tool methods
//! - **Checkpointing** (`checkpoint`): per-session state persistence
//!   (PostgreSQL or in-memory)
//! - **Blob storage** (`blob`): raw payload uploads for the schema branch
//! - **Sandbox** (`sandbox`): isolated code execution in containers
//! - **Server** (`server`): the axum HTTP surface
//!
//! ## Design Principles
//!
//! 1. **Explicit state machines**: the loop and the compaction engine are
//!    enumerated states with transition functions, not ad-hoc control flow
//! 2. **Checkpoint-first durability**: state persists after every loop
//!    transition; a restart resumes mid-turn
//! 3. **Trait seams**: provider, checkpoint store, blob store, executor,
//!    and datasources are traits, so every external collaborator can be
//!    swapped or mocked
//! 4. **Errors feed the model**: protocol and transport failures become
//!    structured tool results the model can react to, never crashes

// Agent loop, state, providers, and the session facade
pub mod agent;

// Blob storage for raw tool payloads
pub mod blob;

// Checkpoint persistence
pub mod checkpoint;

// Compaction of oversized tool outputs
pub mod compaction;

// Configuration
pub mod config;

// Datasource adapters
pub mod datasource;

// Error types
pub mod error;

// Secure code execution
pub mod sandbox;

// HTTP surface
pub mod server;

// Token estimation and chunking
pub mod tokens;

// Tool trait and registry
pub mod tools;

// Re-export commonly used items
pub use error::{Error, Result};

pub use agent::{
    AgentLoop, AgentState, ChatProvider, LoopConfig, Message, Role, SessionFacade, ToolCall,
    TurnResult,
};
pub use checkpoint::CheckpointStore;
pub use compaction::{CompactionConfig, CompactionEngine};
pub use tokens::TokenAccountant;
pub use tools::{Tool, ToolRegistry};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");

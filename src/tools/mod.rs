//! Tools module - the catalog of capabilities exposed to the model
//!
//! Each tool implements the `Tool` trait and is registered into a
//! `ToolRegistry`, which the agent loop binds to the model for function
//! calling. Tools are either native (like `execute_code`) or derived from
//! datasource methods (see the `datasource` module); methods registered
//! under a shared tool name unify into a single action-dispatched tool.

mod registry;
mod sandbox;
mod traits;

pub use registry::ToolRegistry;
pub use sandbox::ExecuteCodeTool;
pub use traits::Tool;

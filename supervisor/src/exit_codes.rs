//! Stable exit codes for supervisor CLI commands.

/// Command completed. Policy rejections and refused approve/reject requests
/// are normal outcomes and also exit with this code.
pub const OK: i32 = 0;
/// An agent invocation, stream decode, precondition or I/O step failed.
pub const FAILED: i32 = 1;
/// The command line could not be parsed.
pub const USAGE: i32 = 2;

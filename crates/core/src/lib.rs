pub mod config;
pub mod domain;
pub mod errors;
pub mod retry;

pub use domain::auth::AuthContext;
pub use domain::conversation::{conversation_id, ConversationArgs, ConversationResult, Message};
pub use domain::turn::{retain_history, ContentSegment, Role, SegmentKind, Turn, TurnContent};
pub use errors::{ConversationError, InterfaceError};
pub use retry::{run_with_retry, RetryPolicy};

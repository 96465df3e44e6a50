//! Session dispatch for Tabletalk.
//!
//! Resolves free-text requests into capability invocations, validates and
//! executes them on one worker per session, and streams ordered response
//! events back to the caller.

pub mod dispatcher;
pub mod error;
pub mod event;
pub mod resolver;
pub mod state_machine;

pub use dispatcher::SessionDispatcher;
pub use error::{DispatchError, ErrorKind, ResolverError, TransitionError};
pub use event::{DispatchRequest, RequestStream, ResponseEvent};
pub use resolver::{IntentResolver, KeywordResolver};
pub use state_machine::{validate_transition, RequestPhase};

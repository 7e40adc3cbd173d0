// Conversation flow: per-user sessions, their store, and the state machine
// that moves a session from job description to finished resume.
// The machine is pure; the dispatcher performs the effects it returns.

pub mod machine;
pub mod messages;
pub mod session;
pub mod store;

pub use machine::{transition, ButtonAction, Effect, Input, RewriteJob};
pub use session::Session;
pub use store::{InMemorySessionStore, SessionStore};

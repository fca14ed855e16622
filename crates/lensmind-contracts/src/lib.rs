//! Shared data contracts for the Lens MIND prompt wizard: the session state
//! machine, run artifacts (events, feedback, draft history, summary), the
//! model catalogue and the console command parser. Nothing here touches the
//! network.

pub mod chat;
pub mod events;
pub mod models;
pub mod providers;
pub mod runs;
pub mod session;

//! Cross-process teleport warmup, handoff, and presence coordination.
//!
//! A waystone process sits beside a host game server. Inside the process it
//! owns teleport warmups and the store-to-store handoff between worlds; across
//! processes it coordinates over a pub/sub broker: who is online where,
//! private messages, broadcasts, and mid-teleport handoffs between servers.
//!
//! Everything is wired through an explicit [`context::Context`] built once at
//! startup -- there are no global singletons.

pub mod broker;
pub mod config;
pub mod context;
pub mod handoff;
pub mod location;
pub mod messaging;
pub mod notify;
pub mod presence;
pub mod protocol;
pub mod router;
pub mod session;
pub mod store;
pub mod warmup;

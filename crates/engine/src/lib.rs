//! Waystone world-hosting layer.
//!
//! A process hosts any number of worlds. Each world owns the authoritative
//! transforms of the players attached to it, and runs every mutation on its
//! own serial queue (the "world thread"). Cross-world moves detach a player's
//! body from one queue and attach it on another; there is no other way to
//! touch a transform from outside.

pub mod queue;
pub mod transform;
pub mod world;

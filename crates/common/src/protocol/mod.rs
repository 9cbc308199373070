// Wire protocol for real-time session events.

pub mod events;

// Forwarding: deciding, composing, and publishing one post at a time.

pub mod compose;
pub mod decision;
pub mod orchestrator;

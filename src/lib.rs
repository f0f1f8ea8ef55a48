// Mirrorbird: mirror a filtered source-platform stream onto another platform
//
// This is the library root. Each module corresponds to one stage of the
// mirroring pipeline, from rule setup and the stream connection through to
// forwarding decisions and the destination publisher.

pub mod config;
pub mod dedup;
pub mod error;
pub mod forward;
pub mod publish;
pub mod status;
pub mod subscriptions;
pub mod twitter;

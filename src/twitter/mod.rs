// Source-platform side: rule management, the filtered stream, and the post
// model built from what the stream delivers.

pub mod client;
pub mod media;
pub mod post;
pub mod rules;
pub mod stream;

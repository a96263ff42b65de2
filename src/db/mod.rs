mod repository;
mod schema;

pub use repository::{Repository, ROUND_ROBIN_CURSOR_KEY};

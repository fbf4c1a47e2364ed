pub mod flush;

pub use flush::{flush_room, FlushReport};

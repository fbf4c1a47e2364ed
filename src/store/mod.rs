pub mod editor_cache;
pub mod presence;

pub use editor_cache::{EditorStateCache, LocalEditorCache, PendingEdit};
pub use presence::{LocalPresenceStore, PresenceStore};

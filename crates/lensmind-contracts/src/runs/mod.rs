pub mod draft_history;
pub mod feedback;
pub mod summary;

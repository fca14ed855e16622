mod draft_image;
mod reducer;
mod stage;
mod state;

pub use draft_image::{DraftImage, DRAFT_MIME_TYPE};
pub use reducer::{
    reduce, DraftSource, Effect, SessionEvent, Transition, MSG_DRAFT_IN_FLIGHT, MSG_EMPTY_INITIAL,
    MSG_EMPTY_MODIFICATION, MSG_NO_DRAFT_IMAGE,
};
pub use stage::Stage;
pub use state::{RequestToken, Session};

pub mod router;
pub mod token;

pub use router::{AdminState, router};

//! Browser-based image analysis and restyling studio.
//!
//! The interesting behavior all lives behind the remote AI capability;
//! this crate is the orchestration around it: a single-flow session
//! state machine, a structured analysis decoder, a caption refinement
//! path, a two-tier image remix pipeline and a small chat assistant,
//! exposed over an axum JSON API with the page served at `/`.

pub mod analysis;
pub mod backend;
pub mod chat;
pub mod error;
pub mod image_data;
pub mod refine;
pub mod remix;
pub mod routes;
pub mod session;

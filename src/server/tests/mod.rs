//! End-to-end tests for the HTTP surface, driven through `warp::test`
//! against the full route tree with a real store on a temp database.

pub(crate) mod helpers;

mod api_surface;
mod llm_logging;
mod preferences_api;

pub mod auth;
pub mod completions;
pub mod model;

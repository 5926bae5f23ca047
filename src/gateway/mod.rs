mod auth;
mod server;

pub use server::{app, build_state, run, AppState};

pub mod handlers;
pub mod routes;
pub mod serverless;

pub use routes::{router, AppState};

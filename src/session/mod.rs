pub mod store;

pub use store::{SessionStore, SESSION_COOKIE};

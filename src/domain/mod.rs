pub mod appointment;
pub mod auth;
pub mod chat_lock;
pub mod event;
pub mod message;
pub mod presence;
pub mod receipt;
pub mod report;
pub mod user;

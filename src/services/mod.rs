pub mod access_gate;
pub mod account_service;
pub mod appointment_service;
pub mod event_bus;
pub mod gateway;
pub mod health_service;
pub mod listing_service;
pub mod message_service;
pub mod presence_service;
pub mod receipt_service;
pub mod report_service;

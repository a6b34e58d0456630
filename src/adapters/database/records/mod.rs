pub mod appointment;
pub mod listing;
pub mod message;
pub mod report;
pub mod user;

pub use appointment::AppointmentRecord;
pub use listing::ListingRecord;
pub use message::MessageRecord;
pub use report::ReportRecord;
pub use user::UserRecord;

pub mod api;
pub mod models;
pub mod reminder;
pub mod streak;

pub use reminder::ReminderTime;
pub use streak::Progress;

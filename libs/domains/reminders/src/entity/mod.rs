//! Sea-ORM entities and their conversions to domain models

pub mod channel;
pub mod reminder;
pub mod reminder_channel;
pub mod session;
pub mod user;
pub mod user_limits;

//! Configuration types for trackbell.
//!
//! These types represent the validated runtime configuration used by the
//! core. The actual config loading/parsing is handled by the server crate.

mod carriers;
mod scheduler;
mod telegram;

pub use carriers::OcaConfig;
pub use scheduler::SchedulerConfig;
pub use telegram::TelegramConfig;

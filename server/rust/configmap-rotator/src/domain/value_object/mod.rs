pub mod rotation_schedule;

pub use rotation_schedule::{RotationSchedule, ScheduleError};

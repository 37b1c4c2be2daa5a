pub mod schedule;
pub mod scheduler;
pub mod state;

pub use schedule::{Cadence, WeeklySchedule};
pub use scheduler::{SchedulingEngine, TickReport};
pub use state::{Mode, SchedulerState, Trigger};

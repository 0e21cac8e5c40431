mod scheduler;
mod state;

pub use scheduler::{Scheduler, SchedulerHandle};
pub use state::{EventWindow, WindowState};

//! Background tasks.

mod room_sweeper;

pub use room_sweeper::{run_sweep, start_room_sweeper};

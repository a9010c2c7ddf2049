pub mod state;
pub mod timer;

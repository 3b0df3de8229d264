pub mod model;
pub mod repository;
pub mod state_machine;

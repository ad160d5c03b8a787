pub mod save;
pub mod wait;

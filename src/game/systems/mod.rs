pub mod ai;
pub mod collision;
pub mod explosion;
pub mod physics;

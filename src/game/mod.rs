pub mod arena;
pub mod constants;
pub mod entity;
pub mod events;
pub mod game_loop;
pub mod schedule;
pub mod spatial;
pub mod systems;
pub mod world;

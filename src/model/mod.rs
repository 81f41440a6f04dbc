pub mod bridge;
pub mod group;
pub mod light;
pub mod schedule;

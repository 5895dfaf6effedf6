pub mod forecast;
pub mod gridpoint;
pub mod location;
pub mod point_entry;
pub mod station;

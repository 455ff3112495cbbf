pub mod ephemeris;
pub mod model;
pub mod sky;

pub mod planner;
pub mod scoring;
pub mod windows;

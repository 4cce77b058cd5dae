//! Device and display output

pub mod audio;
pub mod video;

pub mod questions;
pub mod quiz;
pub mod reaction;
pub mod score;

#![deny(dead_code)]
#![deny(unused_imports)]

pub mod coordinate;
pub mod data;
pub mod model;
pub mod scores;
pub mod solver;
pub mod types;
pub mod vector;

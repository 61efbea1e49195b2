#[macro_use]
pub mod error;

pub mod bookside;
pub mod critbit;
pub mod matching;
pub mod state;
pub mod utils;

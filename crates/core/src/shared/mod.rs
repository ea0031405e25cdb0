pub mod constants;
pub mod errors;
pub mod frame;
pub mod region;

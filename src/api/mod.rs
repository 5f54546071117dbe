pub mod ems;
pub mod utils;

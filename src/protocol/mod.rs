pub mod ems;
pub mod status;
pub mod tty;

pub mod config;
pub mod egress;
pub mod frame;
pub mod http;
pub mod tunnel;
pub mod util;

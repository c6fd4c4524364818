pub mod config;
pub mod runtask;
pub mod signature;
pub mod terminal;

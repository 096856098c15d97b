pub mod exec;
pub mod stop;

pub mod lock;
pub mod tools;

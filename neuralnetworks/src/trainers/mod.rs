mod console;
mod file;
mod forward;
mod sink;
mod store_model;

pub use console::*;
pub use file::*;
pub use forward::*;
pub use sink::*;
pub use store_model::*;

pub mod cli;
pub mod error;
pub mod events;
pub mod filter;
pub mod handler;
pub mod observer;
pub mod report;
pub mod source;
pub mod store;
pub mod tui;
pub mod watcher;

pub use error::*;
pub use events::*;
pub use filter::*;
pub use handler::*;
pub use observer::*;
pub use report::*;
pub use source::*;
pub use store::*;
pub use watcher::*;

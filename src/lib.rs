pub mod backend;
pub mod client;
pub mod config;
pub mod console;
pub mod csrf;
pub mod editor;
pub mod error;
pub mod execution;
pub mod logger;
pub mod model;
pub mod plugins;
pub mod render;
pub mod resources;
pub mod runtime;
pub mod rwlock;
pub mod scheduler;
pub mod sse;
pub mod store;
pub mod tabs;
pub mod transport;
pub mod view;

pub use console::Console;
pub use error::{ConsoleError, ConsoleResult};

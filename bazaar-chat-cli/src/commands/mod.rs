pub mod completion;
pub mod config;
pub mod panel;
pub mod runtime;
pub mod widget;

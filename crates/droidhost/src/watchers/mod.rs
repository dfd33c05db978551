//! Event-driven subsystems around the container.

pub mod clipboard;
pub mod hardware;
pub mod location;
pub mod notifications;
pub mod screen;
pub mod state;

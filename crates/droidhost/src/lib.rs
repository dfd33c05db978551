//! Host-side orchestration for a containerized Android runtime.
//!
//! The `droidhost` binary owns the session: it validates the host
//! environment, boots the LXC container, supervises per-user subsystems
//! (app registry, clipboard, location, notifications, hardware) and serves
//! a Unix-socket IPC surface. The `droidhost-store` binary reconciles
//! F-Droid-style package indexes and drives installs through the session
//! daemon.
//!
//! ```text
//!   droidhost CLI ──┐
//!                   │ JSON over unix socket
//!   droidhost-store ┼──► session daemon ──► lxc-* tools ──► container
//!                   │         │
//!                   └─────────┴──► subsystems (apps, clipboard, gnss, ...)
//! ```

pub mod apps;
pub mod config;
pub mod container;
pub mod error;
pub mod events;
pub mod ipc;
pub mod props;
pub mod session;
pub mod store;
pub mod watchers;

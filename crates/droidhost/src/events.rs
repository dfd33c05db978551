//! Guest-originated state events.
//!
//! The state monitor publishes everything the guest reports onto one
//! broadcast channel; each subsystem subscribes and picks out the events
//! it cares about. A slow subscriber observes `Lagged` and keeps going.

use tokio::sync::broadcast;

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum StateEvent {
    /// A package was added (mode 0), removed (mode 1) or updated (other).
    PackageStateChanged { mode: u32, package_name: String },
    /// The guest clipboard changed; the payload is the new text.
    ClipboardChanged { text: String },
    /// GNSS was switched on or off inside the guest.
    GnssActive { active: bool },
    /// A guest notification was posted, updated or removed.
    Notification(NotificationEvent),
    /// The guest requested host suspend handling.
    Suspend,
    /// The guest requested a container reboot.
    Reboot,
}

#[derive(Debug, Clone)]
pub enum NotificationEvent {
    New {
        hash: String,
        package_name: String,
        ticker: String,
        title: String,
        text: String,
        is_group_summary: bool,
        show_light: bool,
    },
    Update {
        hash: String,
        replaces_hash: String,
        package_name: String,
        ticker: String,
        title: String,
        text: String,
        show_light: bool,
    },
    Delete {
        hash: String,
    },
}

pub type EventSender = broadcast::Sender<StateEvent>;
pub type EventReceiver = broadcast::Receiver<StateEvent>;

pub fn channel() -> (EventSender, EventReceiver) {
    broadcast::channel(EVENT_CHANNEL_CAPACITY)
}

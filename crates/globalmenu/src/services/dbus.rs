//! Small helpers over gio's D-Bus API.
//!
//! `subscribe_to_signal` wraps `DBusConnection::signal_subscribe` with a
//! guard object that unsubscribes on drop, so services can keep signal
//! lifetimes tied to their own fields instead of tracking raw ids.

use gtk4::gio;
use gtk4::glib::Variant;

/// One delivered D-Bus signal.
pub struct SignalMessage {
    /// Unique bus name of the sender, if known.
    pub sender: Option<String>,
    /// Object path the signal was emitted on.
    pub path: String,
    /// Interface the signal belongs to.
    pub interface: String,
    /// Signal member name.
    pub member: String,
    /// Signal body.
    pub parameters: Variant,
}

/// Guard for an active signal subscription; unsubscribes on drop.
pub struct SignalSubscription {
    connection: gio::DBusConnection,
    id: Option<gio::SignalSubscriptionId>,
}

impl Drop for SignalSubscription {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            self.connection.signal_unsubscribe(id);
        }
    }
}

/// Extension trait providing the guarded subscription helper.
pub trait SubscribeToSignal {
    /// Subscribe to matching signals on this connection. The subscription
    /// stays active for as long as the returned guard is alive.
    #[allow(clippy::too_many_arguments)]
    fn subscribe_to_signal<F>(
        &self,
        sender: Option<&str>,
        interface: Option<&str>,
        member: Option<&str>,
        path: Option<&str>,
        arg0: Option<&str>,
        flags: gio::DBusSignalFlags,
        callback: F,
    ) -> SignalSubscription
    where
        F: Fn(&SignalMessage) + 'static;
}

impl SubscribeToSignal for gio::DBusConnection {
    fn subscribe_to_signal<F>(
        &self,
        sender: Option<&str>,
        interface: Option<&str>,
        member: Option<&str>,
        path: Option<&str>,
        arg0: Option<&str>,
        flags: gio::DBusSignalFlags,
        callback: F,
    ) -> SignalSubscription
    where
        F: Fn(&SignalMessage) + 'static,
    {
        let id = self.signal_subscribe(
            sender,
            interface,
            member,
            path,
            arg0,
            flags,
            move |_connection, sender, path, interface, member, parameters| {
                let message = SignalMessage {
                    sender: sender.map(|s| s.to_string()),
                    path: path.to_string(),
                    interface: interface.to_string(),
                    member: member.to_string(),
                    parameters: parameters.clone(),
                };
                callback(&message);
            },
        );

        SignalSubscription {
            connection: self.clone(),
            id: Some(id),
        }
    }
}

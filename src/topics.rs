/// Broadcast topic. Only the sender publishes here; receivers subscribe to
/// their own device topic.
pub const BROADCAST_TOPIC: &str = "devices/all/commands";

/// Per-device command topic: `devices/{thing_name}/commands`.
pub fn device_command_topic(thing_name: &str) -> String {
    format!("devices/{thing_name}/commands")
}

//! Per-device FIFO command queues

use relay_shared::CommandId;
use std::collections::{HashMap, VecDeque};

/// A command waiting for its device to become ready
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedCommand {
    pub command_id: CommandId,
    pub payload: String,
}

/// Owns one queue per device id. Queues are created on first use and never
/// removed, so commands submitted while a device is offline wait for it.
#[derive(Debug, Default)]
pub struct CommandQueues {
    queues: HashMap<String, VecDeque<QueuedCommand>>,
    last_command_id: u64,
}

impl CommandQueues {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the next command ID
    fn next_command_id(&mut self) -> CommandId {
        self.last_command_id += 1;
        CommandId::from_sequence(self.last_command_id)
    }

    /// Append a command for a device and return its fresh id
    pub fn enqueue(&mut self, device_id: &str, payload: impl Into<String>) -> CommandId {
        let command_id = self.next_command_id();
        self.queues
            .entry(device_id.to_string())
            .or_default()
            .push_back(QueuedCommand {
                command_id: command_id.clone(),
                payload: payload.into(),
            });
        command_id
    }

    /// Remove and return the head of a device's queue
    pub fn dequeue_next(&mut self, device_id: &str) -> Option<QueuedCommand> {
        self.queues.get_mut(device_id)?.pop_front()
    }

    pub fn has_pending(&self, device_id: &str) -> bool {
        self.pending_count(device_id) > 0
    }

    /// Get count of queued commands for a specific device
    pub fn pending_count(&self, device_id: &str) -> usize {
        self.queues.get(device_id).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_fifo_order() {
        let mut queues = CommandQueues::new();
        let first = queues.enqueue("dev1", "open_chat");
        let second = queues.enqueue("dev1", "post_message");

        assert_eq!(queues.pending_count("dev1"), 2);
        assert_eq!(queues.dequeue_next("dev1").unwrap().command_id, first);

        let next = queues.dequeue_next("dev1").unwrap();
        assert_eq!(next.command_id, second);
        assert_eq!(next.payload, "post_message");

        assert!(queues.dequeue_next("dev1").is_none());
        assert!(!queues.has_pending("dev1"));
    }

    #[test]
    fn test_ids_unique_across_devices() {
        let mut queues = CommandQueues::new();
        let mut seen = HashSet::new();
        for i in 0..50 {
            let device = format!("dev{}", i % 3);
            assert!(seen.insert(queues.enqueue(&device, "noop")));
        }
        // Draining does not recycle ids
        while queues.dequeue_next("dev0").is_some() {}
        assert!(seen.insert(queues.enqueue("dev0", "noop")));
        assert_eq!(queues.pending_count("dev0"), 1);
        assert_eq!(queues.pending_count("dev1"), 17);
    }

    #[test]
    fn test_first_id_is_c1() {
        let mut queues = CommandQueues::new();
        assert_eq!(queues.enqueue("dev1", "open_chat").as_str(), "c1");
        assert_eq!(queues.enqueue("dev2", "open_chat").as_str(), "c2");
    }

    #[test]
    fn test_dequeue_unknown_device() {
        let mut queues = CommandQueues::new();
        assert!(queues.dequeue_next("ghost").is_none());
        assert!(!queues.has_pending("ghost"));
        assert_eq!(queues.pending_count("ghost"), 0);
    }
}

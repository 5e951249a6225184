//! # Command Queue
//!
//! Bounded FIFO of [`ParsedCommand`]s between the receive framer (interrupt
//! context, sole producer) and the dispatcher (main loop, sole consumer).
//!
//! Built on [`heapless::spsc::Queue`]. The queue is allocated once per
//! device at boot and lives for the rest of the program, so the split halves
//! are `'static` and can move into their contexts.

use heapless::spsc::{Consumer, Producer, Queue};

use super::protocol::ParsedCommand;

/// Commands held before new ones are dropped
pub const COMMAND_QUEUE_CAPACITY: usize = 8;

/// `heapless` keeps one slot free to tell full from empty
const QUEUE_SLOTS: usize = COMMAND_QUEUE_CAPACITY + 1;

/// Framer-side handle
pub struct CommandSender {
    inner: Producer<'static, ParsedCommand, QUEUE_SLOTS>,
}

/// Dispatcher-side handle
pub struct CommandReceiver {
    inner: Consumer<'static, ParsedCommand, QUEUE_SLOTS>,
}

/// Create an empty command queue
pub fn command_queue() -> (CommandSender, CommandReceiver) {
    let queue: &'static mut Queue<ParsedCommand, QUEUE_SLOTS> = Box::leak(Box::new(Queue::new()));
    let (inner_tx, inner_rx) = queue.split();
    (
        CommandSender { inner: inner_tx },
        CommandReceiver { inner: inner_rx },
    )
}

impl CommandSender {
    /// Queue a command. Returns `false` (and drops the command) when full;
    /// there is no backpressure on the wire, the master times out and retries.
    pub fn push(&mut self, cmd: ParsedCommand) -> bool {
        self.inner.enqueue(cmd).is_ok()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CommandReceiver {
    /// Next command in arrival order
    pub fn pop(&mut self) -> Option<ParsedCommand> {
        self.inner.dequeue()
    }

    /// Discard every pending command
    pub fn clear(&mut self) {
        while self.inner.dequeue().is_some() {}
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for CommandSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandSender").field("len", &self.len()).finish()
    }
}

impl std::fmt::Debug for CommandReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandReceiver").field("len", &self.len()).finish()
    }
}

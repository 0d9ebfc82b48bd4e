//! Scheduling of work off the coordinating thread and delivery of its results.

use std::{
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender},
    time::Duration,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScheduleError {
    #[error("scheduling work failed")]
    Scheduling(Box<dyn std::error::Error + Send + Sync>),
    #[error("scheduler is not implemented on this platform")]
    NotImplemented,
}

/// A unit of work which runs to completion on some thread.
pub type Task = Box<dyn FnOnce() + Send + 'static>;

/// Runs tasks, possibly in parallel. Tasks report back through a [`Mailbox`].
pub trait Scheduler: Send + Sync + 'static {
    fn schedule(&self, task: Task) -> Result<(), ScheduleError>;
}

/// Runs every task inline on the calling thread. Results are available as soon as `schedule`
/// returns, which makes processing deterministic.
#[derive(Default, Clone, Copy)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn schedule(&self, task: Task) -> Result<(), ScheduleError> {
        task();
        Ok(())
    }
}

/// Refuses all work.
pub struct NopScheduler;

impl Scheduler for NopScheduler {
    fn schedule(&self, _task: Task) -> Result<(), ScheduleError> {
        Err(ScheduleError::NotImplemented)
    }
}

/// Sending half of a [`Mailbox`]. Can be moved to any thread.
pub struct MailboxSender<M> {
    sender: Sender<M>,
}

impl<M> Clone for MailboxSender<M> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl<M> MailboxSender<M> {
    /// Delivers `message`. Returns false if the mailbox is gone, in which case nobody is
    /// interested in the result anymore.
    pub fn send(&self, message: M) -> bool {
        if self.sender.send(message).is_err() {
            log::debug!("mailbox closed, dropping message");
            return false;
        }
        true
    }
}

/// Queue of results which wakes up the coordinating thread.
pub struct Mailbox<M> {
    sender: Sender<M>,
    receiver: Receiver<M>,
}

impl<M> Default for Mailbox<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> Mailbox<M> {
    pub fn new() -> Self {
        let (sender, receiver) = mpsc::channel();
        Self { sender, receiver }
    }

    pub fn sender(&self) -> MailboxSender<M> {
        MailboxSender {
            sender: self.sender.clone(),
        }
    }

    pub fn try_recv(&self) -> Option<M> {
        self.receiver.try_recv().ok()
    }

    /// Waits at most `timeout` for the next message.
    pub fn recv_timeout(&self, timeout: Duration) -> Option<M> {
        match self.receiver.recv_timeout(timeout) {
            Ok(message) => Some(message),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }
}

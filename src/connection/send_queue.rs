//! Single-slot outbound buffer with last-write-wins coalescing.
//!
//! The transport carries live preview frames, so an un-sent frame that gets
//! superseded is worthless: offering a new frame replaces the parked one
//! instead of queueing behind it. At most one send is ever in flight; the
//! next frame goes on the wire only when the previous send completes.

use crate::protocol::Frame;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendState {
    #[default]
    Idle,
    Sending,
}

#[derive(Debug, Default)]
pub struct SendQueue {
    state: SendState,
    pending: Option<Frame>,
}

impl SendQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SendState {
        self.state
    }

    /// Park `frame` in the slot, replacing whatever was there. If the wire
    /// is free, the frame is promoted to in-flight and returned for
    /// immediate transmission; otherwise it waits for [`complete`].
    ///
    /// [`complete`]: SendQueue::complete
    pub fn offer(&mut self, frame: Frame) -> Option<Frame> {
        self.pending = Some(frame);
        self.promote()
    }

    /// The in-flight send finished successfully. Returns the next frame to
    /// transmit if one was parked while the wire was busy (drains until the
    /// slot is empty). Send failure is not reported here — the owning
    /// connection tears down instead of retrying.
    pub fn complete(&mut self) -> Option<Frame> {
        debug_assert_eq!(self.state, SendState::Sending, "completion without a send in flight");
        self.state = SendState::Idle;
        self.promote()
    }

    fn promote(&mut self) -> Option<Frame> {
        if self.state == SendState::Sending {
            return None;
        }
        let frame = self.pending.take()?;
        self.state = SendState::Sending;
        Some(frame)
    }
}

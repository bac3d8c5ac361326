//! Local endpoint policy: Producer or Viewer, never both.
//!
//! The controller owns one connection and runs exactly one pipeline at a
//! time. Producer wires a payload source into the connection's send queue;
//! Viewer routes decoded frames to the display sink. Switching roles tears
//! the previous pipeline down before the new one is wired. Role is only
//! ever set explicitly — nothing is inferred from received traffic.

use anyhow::Result;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::connection::{ConnectionEvent, PeerConnection};
use crate::protocol::{Frame, Opcode};
use crate::viewer::DisplaySink;

/// Producer-side payload source: already-encoded JPEG bytes at the device's
/// own cadence. `subscribe` begins production, `unsubscribe` stops it.
pub trait FrameSource {
    fn subscribe(&mut self) -> Result<mpsc::Receiver<Vec<u8>>>;
    fn unsubscribe(&mut self);
}

/// A source that never produces. Used by viewer-only endpoints.
pub struct NullSource;

impl FrameSource for NullSource {
    fn subscribe(&mut self) -> Result<mpsc::Receiver<Vec<u8>>> {
        // Immediately-closed channel: the forwarding task ends right away
        let (_, rx) = mpsc::channel(1);
        Ok(rx)
    }

    fn unsubscribe(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Producer,
    Viewer,
}

pub struct EndpointController<S: FrameSource, D: DisplaySink> {
    conn: PeerConnection,
    source: S,
    display: D,
    role: Option<Role>,
    forward: Option<JoinHandle<()>>,
}

impl<S: FrameSource, D: DisplaySink> EndpointController<S, D> {
    pub fn new(conn: PeerConnection, source: S, display: D) -> Self {
        Self {
            conn,
            source,
            display,
            role: None,
            forward: None,
        }
    }

    pub fn role(&self) -> Option<Role> {
        self.role
    }

    /// Whether the producer pipeline is currently wired.
    pub fn is_producing(&self) -> bool {
        self.forward.is_some()
    }

    pub fn display_mut(&mut self) -> &mut D {
        &mut self.display
    }

    /// Switch to `role`, tearing down the previous pipeline first. The two
    /// branches are never active at the same time.
    pub fn set_role(&mut self, role: Role) -> Result<()> {
        self.stop_producer();

        if role == Role::Producer {
            let mut payloads = self.source.subscribe()?;
            let sender = self.conn.sender();
            self.forward = Some(tokio::spawn(async move {
                while let Some(payload) = payloads.recv().await {
                    // Backpressure is absorbed entirely by the send queue's
                    // replace semantics; no buffering here
                    sender.send(Frame::jpeg(payload));
                }
            }));
        }

        self.role = Some(role);
        Ok(())
    }

    /// Route one connection event. Image frames are consumed by the viewer
    /// branch (and ignored otherwise); lifecycle events are handed back to
    /// the caller. Lifecycle events never change role.
    pub fn handle_event(&mut self, event: ConnectionEvent) -> Option<ConnectionEvent> {
        match event {
            ConnectionEvent::Frame(frame) => {
                if self.role == Some(Role::Viewer) && frame.opcode == Opcode::Jpeg {
                    self.display.show(&frame.payload);
                }
                None
            }
            other => Some(other),
        }
    }

    /// Stop producing and close the connection.
    pub fn close(&mut self) {
        self.stop_producer();
        self.conn.close();
    }

    fn stop_producer(&mut self) {
        self.source.unsubscribe();
        if let Some(task) = self.forward.take() {
            task.abort();
        }
    }
}

impl<S: FrameSource, D: DisplaySink> Drop for EndpointController<S, D> {
    fn drop(&mut self) {
        self.stop_producer();
    }
}

//! sluice-services — the reliable-delivery engine.
//!
//! Sliding windows on both sides, the file store they read from and write
//! to, and the session drivers that run the handshake and transfer over a
//! datagram [`Transport`].

pub mod file_store;
pub mod listener;
pub mod receiver;
pub mod recv_window;
pub mod send_window;
pub mod sender;
pub mod session;
pub mod stats;
pub mod transport;
pub mod window;

pub use file_store::{FileSource, FileStore, SegmentSink, SegmentSource, StagedFile, StoreError};
pub use listener::Listener;
pub use receiver::{fetch, ReceiverSession};
pub use recv_window::{Acceptance, RecvWindow};
pub use send_window::{SendWindow, SlideResult};
pub use sender::SenderSession;
pub use session::{
    new_session_table, EventSink, Phase, Role, SessionConfig, SessionError, SessionEvent,
    SessionTable, TransferReport,
};
pub use stats::TransferStats;
pub use transport::Transport;
pub use window::{Segment, WindowSlot};

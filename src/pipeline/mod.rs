//! Playback pipeline
//!
//! Demux -> decode -> present, one thread per stage. The read loop feeds a
//! [`packet_queue::PacketQueue`] per stream, a [`decode_worker`] per stream
//! turns packets into [`frame_queue::FrameQueue`] slots, and the
//! [`presenter`] / audio callback consume them paced against the
//! [`clock`]s. [`coordinator::Player`] wires it all together.

pub mod clock;
pub mod coordinator;
pub mod decode_worker;
pub mod frame_queue;
pub mod packet_queue;
pub mod presenter;
pub mod ring;
pub mod state;
pub mod sync;

//! Communication layer for the time-parallel solver.
//!
//! Workers owning adjacent time partitions exchange boundary state through a
//! [`Communicator`]: point-to-point tagged messages plus the root-anchored
//! collectives (broadcast, gather) that move the global input and output.
//!
//! Two transports are provided. [`MeshComm`] wires every rank of a single
//! process together over in-memory channels and is what the engine tests and
//! the demo driver use. [`TcpComm`] runs one process per rank over TCP using
//! the length-prefixed frame codec in this crate.

mod align;
mod comm;
mod deserialize;
mod mesh;
mod msg;
mod receiver;
mod sender;
mod serialize;
mod tcp;

use tokio::io::{AsyncRead, AsyncWrite};

pub use align::Align8;
pub use comm::{CommErr, Communicator, Result, root_only};
pub use deserialize::Deserialize;
pub use mesh::MeshComm;
pub use msg::{Frame, Hello};
pub use receiver::FrameReceiver;
pub use sender::FrameSender;
pub use serialize::Serialize;
pub use tcp::TcpComm;

type LenType = u64;
const LEN_TYPE_SIZE: usize = size_of::<LenType>();

/// Creates both ends of a framed channel over an async reader/writer pair.
///
/// # Arguments
/// * `rx` - An async readable.
/// * `tx` - An async writable.
///
/// # Returns
/// The receiving and sending halves of the framed stream.
pub fn channel<R, W>(rx: R, tx: W) -> (FrameReceiver<R>, FrameSender<W>)
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    (FrameReceiver::new(rx), FrameSender::new(tx))
}

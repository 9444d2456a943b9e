use std::{error::Error, fmt, io};

/// The communication module's result type.
pub type Result<T> = std::result::Result<T, CommErr>;

/// Tags reserved for the collective operations. Point-to-point users must
/// stay below this range.
pub const TAG_BCAST: u32 = 0xFFFF_0000;
pub const TAG_GATHER: u32 = 0xFFFF_0001;

/// Transport failures. Any of these aborts the whole worker group: the
/// time-parallel recurrence has no meaningful result with a missing
/// partition, so there is no partial-failure recovery path.
#[derive(Debug)]
pub enum CommErr {
    Io(io::Error),
    Disconnected { peer: usize },
    Protocol { detail: String },
}

impl fmt::Display for CommErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommErr::Io(e) => write!(f, "io error: {e}"),
            CommErr::Disconnected { peer } => write!(f, "peer {peer} disconnected"),
            CommErr::Protocol { detail } => write!(f, "protocol violation: {detail}"),
        }
    }
}

impl Error for CommErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CommErr::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CommErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<CommErr> for io::Error {
    fn from(value: CommErr) -> Self {
        match value {
            CommErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Message passing between the owners of the time partitions.
///
/// `send` is non-blocking; `recv` blocks until a frame with the requested
/// `(peer, tag)` pair arrives, stashing any frames received out of order.
pub trait Communicator {
    fn rank(&self) -> usize;

    fn size(&self) -> usize;

    /// Queues `data` for delivery to `to` without waiting for it.
    fn send(&mut self, to: usize, tag: u32, data: &[f64]) -> Result<()>;

    /// Blocks until the message tagged `tag` from `from` arrives.
    fn recv(&mut self, from: usize, tag: u32) -> Result<Vec<f64>>;

    fn is_root(&self) -> bool {
        self.rank() == 0
    }

    /// Distributes `data` from `root` to every rank.
    fn broadcast(&mut self, root: usize, data: &mut Vec<f64>) -> Result<()> {
        if self.rank() == root {
            for peer in 0..self.size() {
                if peer != root {
                    self.send(peer, TAG_BCAST, data)?;
                }
            }
        } else {
            *data = self.recv(root, TAG_BCAST)?;
        }
        Ok(())
    }

    /// Collects one slice per rank at `root`, in rank order.
    ///
    /// # Returns
    /// `Some` with every rank's part on the root, `None` elsewhere.
    fn gather(&mut self, root: usize, part: &[f64]) -> Result<Option<Vec<Vec<f64>>>> {
        if self.rank() == root {
            let mut parts = Vec::with_capacity(self.size());
            for peer in 0..self.size() {
                if peer == root {
                    parts.push(part.to_vec());
                } else {
                    parts.push(self.recv(peer, TAG_GATHER)?);
                }
            }
            Ok(Some(parts))
        } else {
            self.send(root, TAG_GATHER, part)?;
            Ok(None)
        }
    }

    /// Sums `x` over all ranks; every rank sees the same total.
    fn allreduce_sum(&mut self, x: f64) -> Result<f64> {
        let total = match self.gather(0, &[x])? {
            Some(parts) => parts.iter().map(|p| p[0]).sum(),
            None => 0.0,
        };

        let mut buf = vec![total];
        self.broadcast(0, &mut buf)?;
        Ok(buf[0])
    }
}

/// Runs `f` only on the root rank, returning an explicit absent value on
/// every other rank. Root-held data (loss, labels, the global batch) goes
/// through this gate rather than through implicit presence checks.
pub fn root_only<C: Communicator + ?Sized, T>(comm: &C, f: impl FnOnce() -> T) -> Option<T> {
    comm.is_root().then(f)
}

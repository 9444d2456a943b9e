use std::{collections::VecDeque, io, net::SocketAddr, time::Duration};

use log::{debug, info};
use tokio::{
    net::{
        TcpListener, TcpStream,
        tcp::{OwnedReadHalf, OwnedWriteHalf},
    },
    runtime::{Builder, Runtime},
    time::sleep,
};

use crate::{
    CommErr, Communicator, FrameReceiver, FrameSender, Result,
    msg::{Frame, Hello},
};

const CONNECT_RETRIES: usize = 50;
const CONNECT_BACKOFF: Duration = Duration::from_millis(100);

struct Peer {
    rx: FrameReceiver<OwnedReadHalf>,
    tx: FrameSender<OwnedWriteHalf>,
    buf: Vec<u64>,
    stash: VecDeque<(u32, Vec<f64>)>,
}

/// One-process-per-rank communicator over TCP.
///
/// The engine is synchronous, so this is a blocking facade over a private
/// current-thread tokio runtime; the framed wire protocol is the one in
/// [`crate::msg`].
pub struct TcpComm {
    rank: usize,
    rt: Runtime,
    peers: Vec<Option<Peer>>,
}

impl TcpComm {
    /// Wires this rank to every other rank of the group.
    ///
    /// Each rank listens on its own address, dials every lower rank
    /// (retrying while those come up) and accepts one connection per higher
    /// rank; a `Hello` frame identifies the dialing side.
    ///
    /// # Arguments
    /// * `rank` - This worker's rank.
    /// * `addrs` - One listen address per rank, identical on all workers.
    ///
    /// # Returns
    /// A fully connected communicator.
    pub fn connect(rank: usize, addrs: &[SocketAddr]) -> Result<Self> {
        let rt = Builder::new_current_thread().enable_all().build()?;
        let peers = rt.block_on(bootstrap(rank, addrs))?;

        info!("rank {rank} connected to {} peers", addrs.len() - 1);
        Ok(Self { rank, rt, peers })
    }
}

async fn bootstrap(rank: usize, addrs: &[SocketAddr]) -> Result<Vec<Option<Peer>>> {
    let listener = TcpListener::bind(addrs[rank]).await?;
    let mut peers: Vec<Option<Peer>> = (0..addrs.len()).map(|_| None).collect();

    for (lower, addr) in addrs[..rank].iter().enumerate() {
        let stream = dial(addr).await?;
        let (rx, tx) = stream.into_split();
        let (rx, mut tx) = crate::channel(rx, tx);

        tx.send(&Frame::Hello(Hello { rank })).await?;
        debug!("rank {rank} dialed rank {lower}");

        peers[lower] = Some(Peer {
            rx,
            tx,
            buf: Vec::new(),
            stash: VecDeque::new(),
        });
    }

    for _ in rank + 1..addrs.len() {
        let (stream, _) = listener.accept().await?;
        let (rx, tx) = stream.into_split();
        let (mut rx, tx) = crate::channel(rx, tx);

        let mut buf = Vec::new();
        let higher = match rx.recv_into(&mut buf).await? {
            Frame::Hello(Hello { rank }) => rank,
            other => {
                return Err(CommErr::Protocol {
                    detail: format!("expected hello, got {other:?}"),
                });
            }
        };
        debug!("rank {rank} accepted rank {higher}");

        peers[higher] = Some(Peer {
            rx,
            tx,
            buf,
            stash: VecDeque::new(),
        });
    }

    Ok(peers)
}

async fn dial(addr: &SocketAddr) -> io::Result<TcpStream> {
    let mut last = None;
    for _ in 0..CONNECT_RETRIES {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => last = Some(e),
        }
        sleep(CONNECT_BACKOFF).await;
    }

    Err(last.unwrap_or_else(|| io::Error::other("no connection attempt made")))
}

impl Communicator for TcpComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.peers.len()
    }

    fn send(&mut self, to: usize, tag: u32, data: &[f64]) -> Result<()> {
        let rt = &self.rt;
        let peer = self
            .peers
            .get_mut(to)
            .and_then(Option::as_mut)
            .ok_or(CommErr::Disconnected { peer: to })?;

        let frame = Frame::Data { tag, nums: data };
        rt.block_on(peer.tx.send(&frame))?;
        Ok(())
    }

    fn recv(&mut self, from: usize, tag: u32) -> Result<Vec<f64>> {
        let rt = &self.rt;
        let peer = self
            .peers
            .get_mut(from)
            .and_then(Option::as_mut)
            .ok_or(CommErr::Disconnected { peer: from })?;

        if let Some(pos) = peer.stash.iter().position(|(t, _)| *t == tag) {
            return Ok(peer.stash.remove(pos).map(|(_, d)| d).unwrap_or_default());
        }

        loop {
            let Peer { rx, buf, stash, .. } = &mut *peer;
            let frame: Frame = rt.block_on(rx.recv_into(buf))?;

            match frame {
                Frame::Data { tag: t, nums } if t == tag => return Ok(nums.to_vec()),
                Frame::Data { tag: t, nums } => stash.push_back((t, nums.to_vec())),
                Frame::Err(detail) => {
                    return Err(CommErr::Protocol {
                        detail: detail.into_owned(),
                    });
                }
                other => {
                    return Err(CommErr::Protocol {
                        detail: format!("unexpected frame: {other:?}"),
                    });
                }
            }
        }
    }
}

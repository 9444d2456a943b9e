use std::{
    collections::VecDeque,
    sync::mpsc::{Receiver, Sender, channel},
};

use crate::comm::{CommErr, Communicator, Result};

struct Packet {
    from: usize,
    tag: u32,
    data: Vec<f64>,
}

/// In-process communicator: every rank of the group runs on its own thread
/// and the mesh wires each pair together over an unbounded channel.
///
/// Sends never block. Receives block on the rank's single inbox and stash
/// frames that arrive ahead of the `(peer, tag)` being waited on.
pub struct MeshComm {
    rank: usize,
    txs: Vec<Sender<Packet>>,
    rx: Receiver<Packet>,
    stash: VecDeque<Packet>,
}

impl MeshComm {
    /// Creates a fully wired group of `n` communicators, one per rank.
    ///
    /// # Arguments
    /// * `n` - The number of workers in the group.
    ///
    /// # Returns
    /// One `MeshComm` per rank, in rank order; move each onto its worker
    /// thread.
    pub fn group(n: usize) -> Vec<MeshComm> {
        let (txs, rxs): (Vec<_>, Vec<_>) = (0..n).map(|_| channel()).unzip();

        rxs.into_iter()
            .enumerate()
            .map(|(rank, rx)| MeshComm {
                rank,
                txs: txs.clone(),
                rx,
                stash: VecDeque::new(),
            })
            .collect()
    }
}

impl Communicator for MeshComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.txs.len()
    }

    fn send(&mut self, to: usize, tag: u32, data: &[f64]) -> Result<()> {
        let packet = Packet {
            from: self.rank,
            tag,
            data: data.to_vec(),
        };

        self.txs[to]
            .send(packet)
            .map_err(|_| CommErr::Disconnected { peer: to })
    }

    fn recv(&mut self, from: usize, tag: u32) -> Result<Vec<f64>> {
        if let Some(pos) = self
            .stash
            .iter()
            .position(|p| p.from == from && p.tag == tag)
        {
            // stash holds at most a few boundary frames, the scan is cheap
            return Ok(self.stash.remove(pos).map(|p| p.data).unwrap_or_default());
        }

        loop {
            let packet = self
                .rx
                .recv()
                .map_err(|_| CommErr::Disconnected { peer: from })?;

            if packet.from == from && packet.tag == tag {
                return Ok(packet.data);
            }

            self.stash.push_back(packet);
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn out_of_order_tags_are_stashed() {
        let mut group = MeshComm::group(2);
        let mut right = group.pop().unwrap();
        let mut left = group.pop().unwrap();

        left.send(1, 7, &[1.0]).unwrap();
        left.send(1, 8, &[2.0]).unwrap();

        assert_eq!(right.recv(0, 8).unwrap(), vec![2.0]);
        assert_eq!(right.recv(0, 7).unwrap(), vec![1.0]);
    }

    #[test]
    fn broadcast_reaches_every_rank() {
        let group = MeshComm::group(3);

        let handles: Vec<_> = group
            .into_iter()
            .map(|mut comm| {
                std::thread::spawn(move || {
                    let mut data = if comm.is_root() {
                        vec![3.5, -1.0]
                    } else {
                        Vec::new()
                    };
                    comm.broadcast(0, &mut data).unwrap();
                    data
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), vec![3.5, -1.0]);
        }
    }

    #[test]
    fn allreduce_sums_across_ranks() {
        let group = MeshComm::group(4);

        let handles: Vec<_> = group
            .into_iter()
            .map(|mut comm| {
                std::thread::spawn(move || {
                    let mine = comm.rank() as f64 + 1.0;
                    comm.allreduce_sum(mine).unwrap()
                })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.join().unwrap(), 10.0);
        }
    }
}

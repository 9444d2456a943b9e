use std::{env, io, thread};

use halo::{Communicator, MeshComm, root_only};
use log::info;
use mgopt::{
    ChainConfig, MgOptConfig, NestedIteration, OdeStep, Sgd, StepModule, mse, train,
};
use mgrit::{CycleConfig, State};
use ndarray::Array2;
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const WIDTH: usize = 4;
const BATCH: usize = 8;

/// Synthetic regression target: a fixed random rotation-ish map of the
/// input, so the network has something nontrivial but learnable to fit.
fn dataset(batches: usize) -> Vec<(State, State)> {
    let mut rng = StdRng::seed_from_u64(1234);
    let map = Array2::random_using((WIDTH, WIDTH), Uniform::new(-0.5, 0.5), &mut rng);

    (0..batches)
        .map(|_| {
            let x = Array2::random_using((BATCH, WIDTH), Uniform::new(-1.0, 1.0), &mut rng);
            let y = x.dot(&map.t()) + &x;
            (x, y)
        })
        .collect()
}

fn run(mut comm: MeshComm) -> io::Result<()> {
    let workers = comm.size();
    let data = root_only(&comm, || dataset(16));

    let cycle = CycleConfig {
        max_levels: 2,
        cfactors: vec![2],
        max_iters: 4,
        tol: 1e-10,
        ..CycleConfig::default()
    };
    let cfg = ChainConfig {
        total_steps: 8 * workers,
        rfactor: 2,
        depth: 3,
        width: WIDTH,
        t_final: 2.0,
        fwd: cycle.clone(),
        bwd: cycle,
    };

    let mut chain = NestedIteration::build(
        &comm,
        &cfg,
        || Box::new(OdeStep::zeroed(WIDTH)) as Box<dyn StepModule>,
        || Box::new(Sgd { lr: 0.05 }) as Box<dyn mgopt::Optimizer>,
    )
    .map_err(io::Error::other)?;

    // deterministic weight init, each rank seeding only its own interval
    for level in &mut chain.levels {
        let mut rng = StdRng::seed_from_u64(42 + comm.rank() as u64);
        let n = level.net.bank.num_owned() * level.net.bank.layer_param_len();
        let init: Vec<f64> = (0..n).map(|_| rng.gen_range(-0.3..0.3)).collect();
        level.net.bank.set_params_flat(&init).map_err(io::Error::other)?;
    }

    let warm = chain
        .warm_start(&mut comm, data.as_deref(), 4, mse)
        .map_err(io::Error::other)?;
    if comm.is_root() {
        info!("warm start losses: {warm:.4?}");
    }

    let mgopt = MgOptConfig {
        mgopt_levels: 2,
        mgopt_iter: 10,
        ..MgOptConfig::default()
    };
    let stats = train(&mut comm, &mut chain, &mgopt, data.as_deref(), mse)
        .map_err(io::Error::other)?;

    if comm.is_root() {
        info!(
            "{} cycles, loss {:.6e} -> {:.6e}",
            stats.cycles,
            stats.losses.first().copied().unwrap_or_default(),
            stats.losses.last().copied().unwrap_or_default()
        );
    }
    Ok(())
}

fn main() -> io::Result<()> {
    env_logger::init();

    let workers = env::var("WORKERS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(4);
    info!("training with {workers} workers");

    let handles: Vec<_> = MeshComm::group(workers)
        .into_iter()
        .map(|comm| thread::spawn(move || run(comm)))
        .collect();

    for handle in handles {
        handle
            .join()
            .map_err(|_| io::Error::other("worker panicked"))??;
    }
    Ok(())
}

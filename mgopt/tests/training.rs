use std::thread;

use halo::{Communicator, MeshComm};
use mgopt::{
    ChainConfig, LineSearch, MgOptConfig, MgOptLevel, NestedIteration, OdeStep, Optimizer, Sgd,
    StepModule, mse, train,
};
use mgrit::{CycleConfig, State};
use ndarray::Array2;
use ndarray_rand::RandomExt;
use ndarray_rand::rand_distr::Uniform;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use timegrid::ConfigError;

const WIDTH: usize = 3;
const BATCH: usize = 4;

fn run_ranks<F>(size: usize, body: F)
where
    F: Fn(MeshComm) + Clone + Send + 'static,
{
    let _ = env_logger::builder().is_test(true).try_init();

    let handles: Vec<_> = MeshComm::group(size)
        .into_iter()
        .map(|comm| {
            let body = body.clone();
            thread::spawn(move || body(comm))
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
}

/// Identity-map regression data; the near-identity network starts close.
fn dataset(batches: usize) -> Vec<(State, State)> {
    let mut rng = StdRng::seed_from_u64(99);
    (0..batches)
        .map(|_| {
            let x = Array2::random_using((BATCH, WIDTH), Uniform::new(-1.0, 1.0), &mut rng);
            let y = x.clone();
            (x, y)
        })
        .collect()
}

fn chain_config(total_steps: usize, depth: usize) -> ChainConfig {
    let cycle = CycleConfig {
        max_levels: 2,
        cfactors: vec![2],
        max_iters: 4,
        tol: 1e-10,
        ..CycleConfig::default()
    };
    ChainConfig {
        total_steps,
        rfactor: 2,
        depth,
        width: WIDTH,
        t_final: 1.0,
        fwd: cycle.clone(),
        bwd: cycle,
    }
}

/// Builds a chain with bit-reproducible parameters: zeroed modules, then a
/// seeded init over each rank's own interval.
fn build_chain(comm: &MeshComm, cfg: &ChainConfig, lr: f64, seed: u64) -> NestedIteration {
    let mut chain = NestedIteration::build(
        comm,
        cfg,
        || Box::new(OdeStep::zeroed(WIDTH)) as Box<dyn StepModule>,
        || Box::new(Sgd { lr }) as Box<dyn Optimizer>,
    )
    .unwrap();

    for (k, level) in chain.levels.iter_mut().enumerate() {
        let mut rng = StdRng::seed_from_u64(seed + 100 * k as u64 + comm.rank() as u64);
        let n = level.net.bank.num_owned() * level.net.bank.layer_param_len();
        let init: Vec<f64> = (0..n).map(|_| rng.gen_range(-0.2..0.2)).collect();
        level.net.bank.set_params_flat(&init).unwrap();
    }
    chain
}

/// The exact operation sequence of one driver relaxation step, spelled out.
fn manual_relax(
    comm: &mut MeshComm,
    level: &mut MgOptLevel,
    data: Option<&[(State, State)]>,
    cursor: usize,
) -> f64 {
    let batch = comm
        .is_root()
        .then(|| &data.unwrap()[cursor % data.unwrap().len()]);

    let fwd = level.net.forward(comm, batch.map(|b| &b.0), None).unwrap();
    let seed = batch.map(|b| mse(&fwd.output, &b.1));

    let mut value = vec![seed.as_ref().map(|(l, _)| *l).unwrap_or_default()];
    comm.broadcast(0, &mut value).unwrap();

    let bwd = level
        .net
        .backward(comm, seed.as_ref().map(|(_, s)| s), &fwd.tape)
        .unwrap();
    level.net.widen_budgets(&fwd.stats, &bwd.stats);

    let grad: Vec<f64> = bwd.grads.into_values().flatten().collect();
    let mut params = level.net.bank.params_flat();
    level.opt.update(&mut params, &grad);
    level.net.bank.set_params_flat(&params).unwrap();
    value[0]
}

#[test]
fn single_level_driver_is_plain_relaxation_bit_for_bit() {
    run_ranks(2, |mut comm| {
        let cfg = chain_config(8, 1);
        let data = comm.is_root().then(|| dataset(4));

        let mut driven = build_chain(&comm, &cfg, 0.05, 7);
        let mut manual = build_chain(&comm, &cfg, 0.05, 7);
        assert_eq!(
            driven.levels[0].net.bank.params_flat(),
            manual.levels[0].net.bank.params_flat()
        );

        let mgopt = MgOptConfig {
            mgopt_levels: 1,
            mgopt_iter: 2,
            nrelax_pre: 1,
            nrelax_post: 1,
            ..MgOptConfig::default()
        };
        let stats = train(&mut comm, &mut driven, &mgopt, data.as_deref(), mse).unwrap();

        // 2 cycles of (pre + post) relaxation = 4 steps, batches 0..4
        let mut losses = Vec::new();
        for cursor in 0..4 {
            losses.push(manual_relax(
                &mut comm,
                &mut manual.levels[0],
                data.as_deref(),
                cursor,
            ));
        }

        assert_eq!(
            driven.levels[0].net.bank.params_flat(),
            manual.levels[0].net.bank.params_flat()
        );
        assert_eq!(stats.cycles, 2);
        assert_eq!(stats.losses, vec![losses[1], losses[3]]);
    });
}

#[test]
fn resolution_chain_divides_steps_by_the_refinement_factor() {
    run_ranks(2, |comm| {
        let cfg = chain_config(16, 3);
        let chain = build_chain(&comm, &cfg, 0.05, 1);

        let steps: Vec<usize> = chain.levels.iter().map(|l| l.net.steps).collect();
        assert_eq!(steps, vec![16, 8, 4]);

        for level in &chain.levels {
            assert_eq!(level.net.bank.num_owned(), level.net.steps / 2);
            let dt = level.net.bank.dt();
            assert!((dt - 1.0 / level.net.steps as f64).abs() < 1e-15);
        }
    });
}

#[test]
fn nested_iteration_reports_one_loss_per_step() {
    run_ranks(2, |mut comm| {
        let cfg = chain_config(8, 2);
        let data = comm.is_root().then(|| dataset(4));
        let mut chain = build_chain(&comm, &cfg, 0.02, 5);

        let losses = chain.warm_start(&mut comm, data.as_deref(), 3, mse).unwrap();

        assert_eq!(losses.len(), 2 * 3);
        assert!(losses.iter().all(|l| l.is_finite()));
    });
}

#[test]
fn defect_corrected_cycles_reduce_the_loss() {
    run_ranks(2, |mut comm| {
        let cfg = chain_config(8, 2);
        let data = comm.is_root().then(|| dataset(4));
        let mut chain = build_chain(&comm, &cfg, 0.02, 11);

        let mgopt = MgOptConfig {
            mgopt_levels: 2,
            mgopt_iter: 6,
            line_search: LineSearch::Fixed { alpha: 0.5 },
            ..MgOptConfig::default()
        };
        let stats = train(&mut comm, &mut chain, &mgopt, data.as_deref(), mse).unwrap();

        assert_eq!(stats.cycles, 6);
        assert!(
            stats.losses.last().unwrap() < stats.losses.first().unwrap(),
            "losses: {:?}",
            stats.losses
        );
    });
}

#[test]
fn empty_dataset_is_rejected_before_any_pass() {
    run_ranks(1, |mut comm| {
        let cfg = chain_config(4, 1);
        let mut chain = build_chain(&comm, &cfg, 0.05, 2);

        let err = train(
            &mut comm,
            &mut chain,
            &MgOptConfig {
                mgopt_levels: 1,
                ..MgOptConfig::default()
            },
            Some(&[]),
            mse,
        )
        .unwrap_err();
        assert!(matches!(err, mgopt::MgOptError::EmptyDataset));
    });
}

#[test]
fn chain_geometry_is_validated_up_front() {
    let flat = ChainConfig {
        rfactor: 1,
        ..chain_config(8, 2)
    };
    assert!(matches!(
        flat.validate(),
        Err(ConfigError::CoarseningTooWeak { .. })
    ));

    let ragged = chain_config(6, 3); // 6 does not divide by 2^2
    assert!(matches!(
        ragged.validate(),
        Err(ConfigError::StepsNotRefinable { steps: 6, rfactor: 4 })
    ));
}

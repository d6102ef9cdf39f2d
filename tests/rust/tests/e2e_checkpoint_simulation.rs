//! End-to-end checkpoint simulation test
//!
//! Simulates a realistic two-rank training job:
//! - Each rank holds shards of the model and its own optimizer state
//! - Per-step local checkpoints, written independently per rank
//! - Crash/resume from the latest local checkpoint
//! - Periodic consolidated snapshots handed off to a rollout consumer

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use checkpoint::{
    InMemoryState, LocalCheckpointer, SnapshotWriter, StateDict, StateValue, Stateful,
    SNAPSHOT_FILE_NAME, STABLE_MARKER_NAME,
};
use runtime_core::{TrainingProgress, WorldInfo};
use safetensors::SafeTensors;
use tensor_shard::{DType, LocalProcessGroup, ShardSpec, ShardedTensor, Tensor};

const WORLD_SIZE: usize = 2;

/// Simulates one training rank
struct SimulatedRank {
    world: WorldInfo,
    model: InMemoryState,
    optimizers: Vec<InMemoryState>,
    scheduler: InMemoryState,
    progress: TrainingProgress,
}

impl SimulatedRank {
    fn new(rank: usize) -> Result<Self> {
        let world = WorldInfo::new(rank, rank, WORLD_SIZE)?;

        // Composite model: a row-sharded base weight plus a rank-local
        // auxiliary head that must never reach the snapshot.
        let base_row = [rank as f32 + 1.0, rank as f32 + 2.0];
        let mut model_state = StateDict::new();
        model_state.insert(
            "model.layers.0.weight".to_string(),
            StateValue::Sharded(ShardedTensor::new(
                Tensor::from_f32(vec![1, 2], &base_row)?,
                ShardSpec::new(WORLD_SIZE, rank)?,
            )?),
        );
        model_state.insert(
            "attribution_head.proj.weight".to_string(),
            StateValue::Tensor(Tensor::from_f32(vec![2], &[0.1, 0.2])?),
        );
        let model = InMemoryState::composite(model_state, "model.", "attribution_head.");

        let mut opt_state = StateDict::new();
        opt_state.insert("lr".to_string(), StateValue::Float(3e-4));
        opt_state.insert(
            "exp_avg".to_string(),
            StateValue::Tensor(Tensor::from_f32(vec![2], &[0.0, 0.0])?),
        );

        let mut sched_state = StateDict::new();
        sched_state.insert("last_step".to_string(), StateValue::Int(0));

        Ok(Self {
            world,
            model,
            optimizers: vec![InMemoryState::new(opt_state)],
            scheduler: InMemoryState::new(sched_state),
            progress: TrainingProgress::new(),
        })
    }

    fn train_step(&mut self) {
        self.progress.record_step(2048, 8);
        let mut sched = self.scheduler.extract_state();
        sched.insert(
            "last_step".to_string(),
            StateValue::Int(self.progress.step as i64),
        );
        self.scheduler.restore_state(sched, true).unwrap();
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_training_with_resume() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let root = dir.path().to_path_buf();

    // Phase 1: both ranks train 3 steps and checkpoint each step
    let mut saved = Vec::new();
    for rank in 0..WORLD_SIZE {
        let mut sim = SimulatedRank::new(rank)?;
        let ckpt = LocalCheckpointer::new(&root, sim.world);

        for _ in 0..3 {
            sim.train_step();
            ckpt.save(&sim.model, &sim.optimizers, &sim.progress, &sim.scheduler)
                .await?;
        }
        saved.push(sim);
    }

    // Phase 2: fresh processes resume from the latest step
    for rank in 0..WORLD_SIZE {
        let mut sim = SimulatedRank::new(rank)?;
        let ckpt = LocalCheckpointer::new(&root, sim.world);

        let latest = ckpt.latest_step().await?.expect("checkpoint exists");
        assert_eq!(latest, 3);

        ckpt.load(
            latest,
            &mut sim.model,
            &mut sim.optimizers,
            &mut sim.progress,
            &mut sim.scheduler,
        )
        .await?;

        assert_eq!(sim.progress, saved[rank].progress);
        assert_eq!(sim.model.entries(), saved[rank].model.entries());
        assert_eq!(
            sim.scheduler.get("last_step"),
            Some(&StateValue::Int(3))
        );
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_rank_consolidation_scenario() -> Result<()> {
    // Rank 0 owns row [1, 2], rank 1 owns row [3, 4]; the consolidated
    // snapshot must hold the full 2x2 tensor, downcast to bf16, written
    // by rank 0 only.
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("rollout");

    let group = LocalProcessGroup::new(WORLD_SIZE, Duration::from_secs(10))?;
    let mut tasks = Vec::new();

    for rank in 0..WORLD_SIZE {
        let collective = group.handle(rank)?;
        let out = out.clone();
        let rows = if rank == 0 { [1.0f32, 2.0] } else { [3.0f32, 4.0] };

        tasks.push(tokio::spawn(async move {
            let mut state = StateDict::new();
            state.insert(
                "model.layers.0.weight".to_string(),
                StateValue::Sharded(ShardedTensor::new(
                    Tensor::from_f32(vec![1, 2], &rows)?,
                    ShardSpec::new(WORLD_SIZE, rank)?,
                )?),
            );
            state.insert(
                "attribution_head.proj.weight".to_string(),
                StateValue::Tensor(Tensor::from_f32(vec![2], &[9.0, 9.0])?),
            );
            let model = InMemoryState::composite(state, "model.", "attribution_head.");

            let writer = SnapshotWriter::new(Arc::new(collective));
            let handle = writer.write_background(&model, &out, DType::BF16).await?;
            handle.join().await.map_err(anyhow::Error::from)
        }));
    }

    for task in tasks {
        task.await??;
    }

    // The consumer protocol: trust the file only once the marker exists
    assert!(out.join(STABLE_MARKER_NAME).exists());
    let bytes = std::fs::read(out.join(SNAPSHOT_FILE_NAME))?;
    let st = SafeTensors::deserialize(&bytes)?;

    assert_eq!(st.names(), vec!["layers.0.weight"]);
    let view = st.tensor("layers.0.weight")?;
    assert_eq!(view.dtype(), safetensors::Dtype::BF16);
    assert_eq!(view.shape(), &[2, 2]);

    let full = Tensor::from_raw(DType::BF16, view.shape().to_vec(), view.data().to_vec())
        .map_err(anyhow::Error::from)?;
    assert_eq!(full.to_f32_vec(), vec![1.0, 2.0, 3.0, 4.0]);

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_local_checkpoints_and_snapshot_coexist() -> Result<()> {
    // One run writes both persistence paths; neither interferes with the
    // other's layout.
    let dir = tempfile::tempdir()?;
    let ckpt_root = dir.path().join("ckpt");
    let snap_root = dir.path().join("snap");

    let group = LocalProcessGroup::new(1, Duration::from_secs(5))?;
    let mut sim = simulated_single_rank()?;
    let ckpt = LocalCheckpointer::new(&ckpt_root, sim.world);
    let writer = SnapshotWriter::new(Arc::new(group.handle(0)?));

    sim.train_step();
    ckpt.save(&sim.model, &sim.optimizers, &sim.progress, &sim.scheduler)
        .await?;
    writer.write(&sim.model, &snap_root, DType::BF16).await?;

    assert!(ckpt_root.join("step_1/local_rank_0.ckpt").exists());
    assert!(snap_root.join(SNAPSHOT_FILE_NAME).exists());
    assert!(snap_root.join(STABLE_MARKER_NAME).exists());
    Ok(())
}

fn simulated_single_rank() -> Result<SimulatedRank> {
    let mut sim = SimulatedRank::new(0)?;
    // Reshape the shard for a world of one
    let mut state = BTreeMap::new();
    state.insert(
        "model.layers.0.weight".to_string(),
        StateValue::Sharded(ShardedTensor::new(
            Tensor::from_f32(vec![2, 2], &[1.0, 2.0, 3.0, 4.0])?,
            ShardSpec::new(1, 0)?,
        )?),
    );
    sim.model = InMemoryState::composite(state, "model.", "attribution_head.");
    sim.world = WorldInfo::new(0, 0, 1)?;
    Ok(sim)
}

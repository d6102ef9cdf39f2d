//! Cross-crate integration checks for the checkpoint stack

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use checkpoint::{
    InMemoryState, LocalCheckpointer, SnapshotWriter, StateDict, StateValue,
    SNAPSHOT_FILE_NAME, STABLE_MARKER_NAME,
};
use runtime_core::{Error, TrainingProgress, WorldInfo};
use safetensors::SafeTensors;
use tensor_shard::{DType, LocalProcessGroup, Tensor};

fn model_with_tensor(name: &str, rows: usize, cols: usize) -> InMemoryState {
    let values: Vec<f32> = (0..rows * cols).map(|i| i as f32 * 0.5).collect();
    let mut state = StateDict::new();
    state.insert(
        name.to_string(),
        StateValue::Tensor(Tensor::from_f32(vec![rows, cols], &values).unwrap()),
    );
    InMemoryState::new(state)
}

fn single_rank_writer() -> Result<SnapshotWriter> {
    let group = LocalProcessGroup::new(1, Duration::from_secs(5))?;
    Ok(SnapshotWriter::new(Arc::new(group.handle(0)?)))
}

#[tokio::test]
async fn test_marker_implies_parseable_snapshot() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let out = dir.path().join("snap");

    let writer = single_rank_writer()?;
    writer
        .write(&model_with_tensor("w", 64, 32), &out, DType::BF16)
        .await?;

    // The reader's protocol: poll for the marker, then trust the file
    assert!(out.join(STABLE_MARKER_NAME).exists());
    let bytes = std::fs::read(out.join(SNAPSHOT_FILE_NAME))?;
    let st = SafeTensors::deserialize(&bytes)?;
    assert_eq!(st.tensor("w")?.shape(), &[64, 32]);
    Ok(())
}

#[tokio::test]
async fn test_interrupted_writer_leaves_no_marker() -> Result<()> {
    let dir = tempfile::tempdir()?;
    // Block the output directory so persistence fails before the marker
    let out = dir.path().join("snap");
    std::fs::write(&out, b"blocker")?;

    let writer = single_rank_writer()?;
    let handle = writer
        .write_background(&model_with_tensor("w", 4, 4), &out, DType::BF16)
        .await?;
    assert!(handle.join().await.is_err());
    assert!(!out.join(STABLE_MARKER_NAME).exists());
    Ok(())
}

#[tokio::test]
async fn test_load_missing_step_is_not_found() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let world = WorldInfo::new(0, 0, 1)?;
    let ckpt = LocalCheckpointer::new(dir.path(), world);

    let mut model = model_with_tensor("w", 2, 2);
    let mut scheduler = InMemoryState::default();
    let mut progress = TrainingProgress::new();

    let err = ckpt
        .load(
            42,
            &mut model,
            &mut [] as &mut [InMemoryState],
            &mut progress,
            &mut scheduler,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::CheckpointNotFound { .. }));
    Ok(())
}

#[tokio::test]
async fn test_snapshot_then_local_checkpoint_roundtrip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let world = WorldInfo::new(0, 0, 1)?;
    let ckpt = LocalCheckpointer::new(dir.path().join("ckpt"), world);

    let model = model_with_tensor("w", 8, 8);
    let progress = TrainingProgress {
        total_tokens: 4096,
        step: 2,
        total_samples: 16,
    };
    let scheduler = InMemoryState::default();

    ckpt.save(&model, &[] as &[InMemoryState], &progress, &scheduler)
        .await?;

    let mut model2 = model_with_tensor("w", 8, 8);
    let mut progress2 = TrainingProgress::new();
    let mut scheduler2 = InMemoryState::default();
    ckpt.load(
        2,
        &mut model2,
        &mut [] as &mut [InMemoryState],
        &mut progress2,
        &mut scheduler2,
    )
    .await?;

    assert_eq!(model2.entries(), model.entries());
    assert_eq!(progress2, progress);
    Ok(())
}

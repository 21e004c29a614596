// Sequence walk: drive both loaders over the built-in toy datasets
//
// Spiral through a shuffled DataLoader for a few epochs, then SinCurve
// through a SeqDataLoader, showing that each batch position walks the curve
// one step per pull.
//
// Run:  RUST_LOG=debug cargo run -p sequence_walk
//       cargo run -p sequence_walk --features cuda -- --gpu

use tern_data::{DataLoader, DataLoaderConfig, SeqDataLoader, SinCurve, Spiral};

const EPOCHS: usize = 3;
const BATCH_SIZE: usize = 30;
const SEQ_BATCH_SIZE: usize = 4;

fn main() -> tern_core::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let gpu = std::env::args().any(|a| a == "--gpu");

    log::info!("=== Spiral / DataLoader ===");
    let spiral = Spiral::dataset(true)?;
    let config = DataLoaderConfig::default().batch_size(BATCH_SIZE).seed(0);
    let mut loader = DataLoader::new(&spiral, config)?;
    if gpu {
        loader.to_gpu();
    }

    for epoch in 0..EPOCHS {
        let mut seen = 0;
        let mut class_counts = [0usize; 3];
        for batch in loader.by_ref() {
            let batch = batch?;
            seen += batch.len();
            if let Some(t) = &batch.target {
                for c in t.to_f64_vec()? {
                    class_counts[c as usize] += 1;
                }
            }
        }
        log::info!(
            "epoch {}: {} examples, per class {:?}",
            epoch + 1,
            seen,
            class_counts
        );
    }

    log::info!("=== SinCurve / SeqDataLoader ===");
    let curve = SinCurve::dataset(false)?;
    let config = DataLoaderConfig::default().batch_size(SEQ_BATCH_SIZE);
    let mut seq = SeqDataLoader::new(&curve, config)?;
    if gpu {
        seq.to_gpu();
    }

    for step in 0..5 {
        let Some(batch) = seq.next_batch() else { break };
        let batch = batch?;
        log::info!(
            "step {step}: indices {:?} on {} -> x {:?}",
            batch.indices,
            batch.device(),
            batch
                .input
                .to_f64_vec()?
                .iter()
                .map(|v| format!("{v:.3}"))
                .collect::<Vec<_>>()
        );
    }
    log::info!(
        "{} of {} pulls in this epoch done",
        seq.iteration(),
        seq.max_iter()
    );

    Ok(())
}

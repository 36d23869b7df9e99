use clap::Parser;
use curb_dataset::{EvaluationProvider, SampleProvider, Split, TrainingProvider};
use training::{baseline_detector, BaselineConfig, RunArgs, TrainLoop};

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train the baseline curb detector with checkpoint selection")]
struct Args {
    #[command(flatten)]
    run: RunArgs,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = args.run.resolve()?;
    let data = cfg.dataset();

    let train = TrainingProvider::open(&cfg.voc_data_dir, Split::Train, &data)?;
    let test = EvaluationProvider::open(&cfg.voc_data_dir, Split::Test, &data)?;
    if train.is_empty() {
        anyhow::bail!("training split under {} is empty", cfg.voc_data_dir.display());
    }

    let model = baseline_detector(BaselineConfig::from_run(&cfg));
    let mut trainer = TrainLoop::new(cfg, model);
    let summary = trainer.run(&train, &test)?;

    log::info!(
        "finished {} epochs: best_map={:.4} best_accuracy={:.4}",
        summary.epochs.len(),
        summary.best_map,
        summary.best_accuracy
    );
    match summary.best_path() {
        Some(path) => println!("best checkpoint: {}", path.display()),
        None => println!("no checkpoint was saved"),
    }
    Ok(())
}

use clap::Parser;
use curb_dataset::InferenceProvider;
use training::{
    baseline_detector, write_predictions, BaselineConfig, DetectionModel, PredictLoop, RunArgs,
};

#[derive(Parser, Debug)]
#[command(name = "predict", about = "Emit the best-scoring curb box per image as JSON")]
struct Args {
    #[command(flatten)]
    run: RunArgs,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = args.run.resolve()?;

    let provider = InferenceProvider::open(&cfg.predict_voc_data_dir, &cfg.dataset())?;
    let mut model = baseline_detector(BaselineConfig::from_run(&cfg));
    let Some(path) = &cfg.load_path else {
        anyhow::bail!("predict needs --load-path (or load_path in the config file)");
    };
    model
        .load(path)
        .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", path.display()))?;

    let records = PredictLoop::new(cfg.predict_num, cfg.test_num_workers).run(&mut model, &provider)?;
    for r in &records {
        log::debug!("{}: {:?} score={:.3} scene={}", r.image_id, r.bbox, r.score, r.scene_name());
    }
    let out = cfg.predict_output_path();
    write_predictions(&out, &records)?;
    println!("Saved {} predictions to {}", records.len(), out.display());
    Ok(())
}

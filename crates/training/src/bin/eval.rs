use clap::Parser;
use curb_dataset::{EvaluationProvider, Split};
use training::{baseline_detector, BaselineConfig, DetectionModel, EvalLoop, RunArgs};

#[derive(Parser, Debug)]
#[command(name = "eval", about = "Evaluate a checkpoint on the test split (VOC07 mAP and scene accuracy)")]
struct Args {
    #[command(flatten)]
    run: RunArgs,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = args.run.resolve()?;

    let test = EvaluationProvider::open(&cfg.voc_data_dir, Split::Test, &cfg.dataset())?;
    let mut model = baseline_detector(BaselineConfig::from_run(&cfg));
    match &cfg.load_path {
        Some(path) => model
            .load(path)
            .map_err(|e| anyhow::anyhow!("failed to load {}: {e}", path.display()))?,
        None => log::warn!("no --load-path given; evaluating a fresh model"),
    }

    let report = EvalLoop::new(cfg.test_num, cfg.test_num_workers).run(&mut model, &test)?;
    for (label, ap) in curb_dataset::Label::ALL.iter().zip(&report.ap) {
        match ap {
            Some(ap) => println!("ap[{}]={ap:.4}", label.name()),
            None => println!("ap[{}]=undefined", label.name()),
        }
    }
    println!(
        "Eval complete: map={:.4}, accuracy={:.4} ({}/{} scenes)",
        report.map, report.accuracy, report.scene_hits, report.evaluated
    );
    Ok(())
}

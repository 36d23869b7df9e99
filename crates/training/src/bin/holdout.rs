use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "holdout", about = "Write random train/test manifests from the annotation directory")]
struct Args {
    /// Dataset root containing Annotations/.
    #[arg(long)]
    root: PathBuf,
    /// Fraction of ids assigned to the test split.
    #[arg(long, default_value_t = 0.3)]
    ratio: f32,
    /// Seed for a reproducible split.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let summary = curb_dataset::holdout(&args.root, args.ratio, args.seed)?;
    println!(
        "Wrote {} train / {} test ids under {}",
        summary.train.len(),
        summary.test.len(),
        args.root.display()
    );
    Ok(())
}

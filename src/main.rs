use clap::Parser;
use convert_media::args::Args;
use convert_media::processor;
use convert_media::tool::SystemRunner;

fn main() {
    match run() {
        Ok(any_failed) => {
            if any_failed {
                std::process::exit(1);
            }
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

fn run() -> anyhow::Result<bool> {
    let args = Args::parse();
    let summary = processor::run(&args, &SystemRunner)?;
    Ok(summary.any_failed())
}

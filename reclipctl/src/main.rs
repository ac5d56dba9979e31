use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = reclipctl::Cli::parse();
    if let Err(err) = reclipctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

use clap::Parser;

use udstunnel::config::ConfigLoader;
use udstunnel::tunnel::{client, log as tunnel_log, server};

#[derive(Parser, Debug)]
#[command(name = "udstunnel", version, about = "UDS tunnel server")]
struct Cli {
    /// Configuration file to use
    #[arg(short, long)]
    config: Option<String>,

    /// Run the tunnel server
    #[arg(short, long, conflicts_with_all = ["stats", "detailed_stats"])]
    tunnel: bool,

    /// Print the running server statistics
    #[arg(short, long)]
    stats: bool,

    /// Print the running server statistics, detailed version
    #[arg(short, long, conflicts_with = "stats")]
    detailed_stats: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut loader = ConfigLoader::new();
    if let Some(config_file) = &cli.config {
        loader.with_filename(config_file);
    }
    let config = match loader.load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if cli.stats || cli.detailed_stats {
        // The stats client prints to stdout, logging stays quiet
        tunnel_log::setup(&None, "ERROR");
        match client::get_server_stats(&config, cli.detailed_stats).await {
            Ok(body) => println!("{}", body),
            Err(e) => {
                eprintln!("{}", e);
                std::process::exit(1);
            }
        }
        return;
    }

    if !cli.tunnel {
        use clap::CommandFactory;
        Cli::command().print_help().unwrap_or_default();
        return;
    }

    let logfile = if config.logfile.is_empty() {
        None
    } else {
        Some(config.logfile.clone())
    };
    tunnel_log::setup(&logfile, &config.loglevel);

    if let Err(e) = server::launch(config).await {
        log::error!("Tunnel server failed: {:?}", e);
        std::process::exit(1);
    }
}

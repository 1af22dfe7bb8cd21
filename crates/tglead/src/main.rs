use clap::Parser;

use tglead_core::config::Config;

mod cli;
mod commands;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    tglead_core::logging::init("tglead")?;

    let cfg = Config::load()?;

    match cli.command {
        Commands::Groups { export } => commands::groups(&export).await,
        Commands::Scrape {
            export,
            group,
            period,
            quantity,
            mode,
        } => {
            commands::scrape(
                &cfg,
                commands::ScrapeArgs {
                    export,
                    group,
                    period,
                    quantity,
                    mode,
                },
            )
            .await
        }
        Commands::Process {
            input,
            skip_classify,
        } => commands::process(&cfg, input, skip_classify).await,
        Commands::Leads { input } => commands::leads(&cfg, input),
        Commands::Show { path, rows } => commands::show(&cfg, &path, rows),
    }
}

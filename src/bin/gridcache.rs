use anyhow::Result;
use clap::Parser;
use gridcache::cli::{commands, config, Cli, Commands};
use gridcache::logging::init_tracing;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let command = match cli.command {
        Commands::Init(args) => return commands::execute_init(args, &cli.config),
        other => other,
    };

    let mut cfg = config::load_or_default(&cli.config)?;
    if let Some(dir) = cli.store_dir {
        cfg.storage.dir = Some(dir);
    }

    match command {
        Commands::Init(_) => {}
        Commands::Hydrate => commands::execute_hydrate(&cfg).await?,
        Commands::Get(args) => commands::execute_get(&cfg, args).await?,
        Commands::Set(args) => commands::execute_set(&cfg, args).await?,
        Commands::Delete(args) => commands::execute_delete(&cfg, args).await?,
        Commands::Columns => commands::execute_columns(&cfg)?,
        Commands::Dump(args) => commands::execute_dump(&cfg, args).await?,
    }

    Ok(())
}

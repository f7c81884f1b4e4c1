use clap::Parser;
use eyre::WrapErr;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use trove_store::CollectionManager;
use trove_store::publish::DEFAULT_TOKEN_ENV;

mod cli;
mod commands;
mod config;

use cli::Commands;
use config::Config;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    let cli = cli::Cli::parse();

    let default_level = if cli.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .from_env_lossy(),
        )
        .init();

    let mut config = Config::load(cli.config.as_deref()).await?;
    debug!("Using configuration at {:?}", config.path());

    match cli.command {
        Commands::Config { command } => commands::handle_config_command(command, &mut config).await,
        Commands::Validate { path } => commands::handle_validate_command(&path).await,
        Commands::Scan { path, threshold } => {
            commands::handle_scan_command(&path, threshold.unwrap_or(config.store.policy.scan_threshold))
                .await
        }
        command => {
            let manager = build_manager(&config).await?;
            dispatch(command, &manager, &config).await
        }
    }
}

async fn build_manager(config: &Config) -> eyre::Result<CollectionManager> {
    let token = std::env::var(DEFAULT_TOKEN_ENV)
        .ok()
        .filter(|token| !token.trim().is_empty());
    config
        .store
        .build_manager(token)
        .await
        .wrap_err("Failed to initialise the collection manager")
}

async fn dispatch(command: Commands, manager: &CollectionManager, config: &Config) -> eyre::Result<()> {
    match command {
        Commands::Browse {
            query,
            category,
            author,
            tags,
            source,
            limit,
            offset,
        } => {
            let filter = commands::browse::build_filter(query, category, author, tags, limit, offset);
            commands::handle_browse_command(manager, &filter, source.as_deref()).await
        }
        Commands::Search {
            query,
            category,
            author,
            tags,
            limit,
            offset,
        } => {
            let filter = commands::browse::build_filter(Some(query), category, author, tags, limit, offset);
            commands::handle_search_command(manager, &filter).await
        }
        Commands::Info { uri } => commands::handle_info_command(manager, &uri).await,
        Commands::Install {
            uri,
            force,
            skip_dependencies,
            skip_validation,
            skip_hooks,
        } => {
            let options = trove_store::InstallOptions::new()
                .with_force(force)
                .with_skip_dependencies(skip_dependencies)
                .with_skip_validation(skip_validation)
                .with_skip_hooks(skip_hooks);
            commands::handle_install_command(manager, &uri, &options).await
        }
        Commands::Uninstall {
            id,
            force,
            skip_hooks,
        } => {
            let options = trove_store::UninstallOptions::new()
                .with_force(force)
                .with_skip_hooks(skip_hooks);
            commands::handle_uninstall_command(manager, &id, &options).await
        }
        Commands::List { detailed } => commands::handle_list_command(manager, detailed).await,
        Commands::Update {
            id,
            all,
            skip_dependencies,
            skip_validation,
            skip_hooks,
        } => {
            let options = trove_store::UpdateOptions::new()
                .with_skip_dependencies(skip_dependencies)
                .with_skip_validation(skip_validation)
                .with_skip_hooks(skip_hooks);
            match id {
                Some(id) if !all => commands::handle_update_command(manager, &id, &options).await,
                _ => commands::handle_update_all_command(manager, &options).await,
            }
        }
        Commands::Outdated => commands::handle_outdated_command(manager).await,
        Commands::Export {
            id,
            output,
            include_backups,
            compression,
            exclude,
        } => {
            let options = exclude.into_iter().fold(
                trove_store::ExportOptions::new()
                    .with_backups(include_backups)
                    .with_compression(compression),
                |options, pattern| options.with_exclude(pattern),
            );
            commands::handle_export_command(manager, &id, &output, &options).await
        }
        Commands::Verify { id } => commands::handle_verify_command(manager, &id).await,
        Commands::Publish {
            target,
            repo,
            base_branch,
            branch,
            message,
            release,
            tag,
            notes,
            force,
            skip_security_scan,
            dry_run,
            output_dir,
        } => {
            let mut options = trove_store::PublishOptions::new()
                .with_github_repo(repo.unwrap_or_else(|| config.store.registry_repo.clone()))
                .with_force(force)
                .with_skip_security_scan(skip_security_scan)
                .with_dry_run(dry_run);
            if let Some(base_branch) = base_branch {
                options = options.with_base_branch(base_branch);
            }
            if let Some(branch) = branch {
                options = options.with_branch(branch);
            }
            if let Some(message) = message {
                options = options.with_commit_message(message);
            }
            if release {
                options = options.with_release(tag, notes);
            }
            if let Some(output_dir) = output_dir {
                options = options.with_output_dir(output_dir);
            }
            commands::handle_publish_command(manager, &target, &options).await
        }
        Commands::Config { .. } | Commands::Validate { .. } | Commands::Scan { .. } => {
            Err(eyre::eyre!("this command does not use the collection manager"))
        }
    }
}

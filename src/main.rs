//! novel-sync entry point.

use clap::Parser;
use novel_sync::{
    auth::AuthService,
    cache::{self, ChapterFetcher, ChapterStore},
    config::{CacheCommand, Cli, Command, Config, ProgressCommand, TokenCommand},
    content::ContentClient,
    db::{self, Database, ReadingProgress},
    server,
    sync::{ProgressReconciler, ProgressRemote, RemoteProgressClient},
};
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "novel_sync=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = cli.config.clone().or_else(Config::find_config_file);

    let config = if let Some(ref path) = config_path {
        Config::load(path)?
    } else {
        Config::default()
    };

    match cli.command {
        Some(Command::Init { force }) => cmd_init(force).await,
        Some(Command::Token { action }) => cmd_token(action, &config).await,
        Some(Command::Cache { action }) => cmd_cache(action, &config).await,
        Some(Command::Progress { action }) => cmd_progress(action, &config).await,
        Some(Command::Serve { bind }) => cmd_serve(config, bind).await,
        None => cmd_serve(config, None).await,
    }
}

/// Initialize config and database.
async fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_path = PathBuf::from("config.toml");

    if config_path.exists() && !force {
        anyhow::bail!(
            "Config file already exists: {}. Use --force to overwrite.",
            config_path.display()
        );
    }

    std::fs::write(&config_path, Config::generate_default())?;
    println!("Created config file: {}", config_path.display());

    let config = Config::default();
    let _db = Database::open(&config.database.path)?;
    println!("Initialized database: {}", config.database.path.display());

    let _cache = ChapterStore::open(&config.cache.path)?;
    println!("Initialized chapter cache: {}", config.cache.path.display());

    println!("\nEdit config.toml to configure your server.");
    println!("Then run: novel-sync token issue <user-id>");

    Ok(())
}

/// Token management commands.
async fn cmd_token(action: TokenCommand, config: &Config) -> anyhow::Result<()> {
    let db = Database::open(&config.database.path)?;
    let auth = AuthService::new(db, config.auth.session_days);

    match action {
        TokenCommand::Issue { user_id } => {
            let session = auth.issue_token(&user_id)?;
            println!("Token for {}: {}", session.user_id, session.token);
            println!("Expires: {}", format_seconds(session.expires_at));
        }

        TokenCommand::Revoke { token } => {
            if auth.revoke(&token)? {
                println!("Revoked token.");
            } else {
                println!("Token not found.");
            }
        }

        TokenCommand::List => {
            let sessions = auth.list_sessions()?;
            if sessions.is_empty() {
                println!("No tokens issued.");
            } else {
                println!("{:<20} {:<18} TOKEN", "USER", "EXPIRES");
                println!("{}", "-".repeat(80));
                for session in sessions {
                    let prefix: String = session.token.chars().take(8).collect();
                    println!(
                        "{:<20} {:<18} {}...",
                        session.user_id,
                        format_seconds(session.expires_at),
                        prefix
                    );
                }
            }
        }
    }

    Ok(())
}

/// Chapter cache commands.
async fn cmd_cache(action: CacheCommand, config: &Config) -> anyhow::Result<()> {
    let store = ChapterStore::global(&config.cache.path).await?.clone();

    match action {
        CacheCommand::Fetch { work_id, chapters } => {
            let fetcher = content_fetcher(store, config)?;
            for chapter in chapters {
                let cached = fetcher.fetch_and_cache(&work_id, chapter).await?;
                println!(
                    "Cached {} #{}: {} ({})",
                    cached.work_id,
                    cached.chapter_number,
                    cached.title,
                    cache::format_size(cached.size_bytes.max(0) as u64)
                );
            }
        }

        CacheCommand::Prefetch { work_id, from, to } => {
            if to < from {
                anyhow::bail!("--to ({}) is before --from ({})", to, from);
            }
            let fetcher = content_fetcher(store, config)?;
            let present = fetcher.prefetch_range(&work_id, from..=to).await;
            println!(
                "{} of {} chapters of {} available offline",
                present,
                to - from + 1,
                work_id
            );
        }

        CacheCommand::Show { work_id, chapter } => match store.get(&work_id, chapter)? {
            Some(cached) => {
                println!("# {}\n", cached.title);
                println!("{}", cached.content);
            }
            None => println!("Chapter {} of {} is not cached.", chapter, work_id),
        },

        CacheCommand::List { work_id } => {
            let numbers = store.list_chapter_numbers(&work_id)?;
            if numbers.is_empty() {
                println!("No cached chapters for {}.", work_id);
            } else {
                let list: Vec<String> = numbers.iter().map(|n| n.to_string()).collect();
                println!("{}", list.join(" "));
            }
        }

        CacheCommand::Info { work_id: Some(work_id) } => {
            let info = store.cache_info(&work_id)?;
            println!(
                "{}: {} chapters, {}",
                work_id,
                info.count,
                cache::format_size(info.total_bytes.max(0) as u64)
            );
        }

        CacheCommand::Info { work_id: None } => {
            let works = store.list_works()?;
            if works.is_empty() {
                println!("Cache is empty.");
            } else {
                println!("{:<40} {:>8} {:>12} LAST SAVED", "WORK", "CHAPTERS", "SIZE");
                println!("{}", "-".repeat(80));
                for work in works {
                    println!(
                        "{:<40} {:>8} {:>12} {}",
                        work.work_id,
                        work.count,
                        cache::format_size(work.total_bytes.max(0) as u64),
                        db::millis_to_datetime(work.last_saved_at).format("%Y-%m-%d %H:%M")
                    );
                }
                println!(
                    "\nTotal: {}",
                    cache::format_size(store.total_bytes()?.max(0) as u64)
                );
            }
        }

        CacheCommand::Clear { work_id } => {
            let removed = store.clear(&work_id)?;
            println!("Removed {} cached chapters of {}.", removed, work_id);
        }

        CacheCommand::Remove { work_id, chapter } => {
            if store.remove(&work_id, chapter)? {
                println!("Removed chapter {} of {}.", chapter, work_id);
            } else {
                println!("Chapter {} of {} is not cached.", chapter, work_id);
            }
        }

        CacheCommand::Trim { max_bytes } => {
            let limit = max_bytes.unwrap_or(config.cache.max_bytes);
            if limit <= 0 {
                anyhow::bail!("No size limit given; pass --max-bytes or set cache.max_bytes");
            }
            let report = store.trim_to(limit, None)?;
            println!(
                "Removed {} chapters, freed {}, {} remaining.",
                report.removed,
                cache::format_size(report.freed_bytes.max(0) as u64),
                cache::format_size(report.remaining_bytes.max(0) as u64)
            );
        }
    }

    Ok(())
}

fn content_fetcher(
    store: ChapterStore,
    config: &Config,
) -> anyhow::Result<ChapterFetcher<ContentClient>> {
    if config.content.base_url.is_empty() {
        anyhow::bail!("content.base_url is not configured");
    }

    let mut client = ContentClient::new(&config.content.base_url, config.content.timeout())?;
    if let Some(token) = &config.content.token {
        client = client.with_token(token);
    }

    Ok(ChapterFetcher::new(store, client).with_max_bytes(config.cache.max_bytes))
}

/// Reading progress commands, against the remote server if configured.
async fn cmd_progress(action: ProgressCommand, config: &Config) -> anyhow::Result<()> {
    let user_id = config.remote.user_id.clone();

    if config.remote.is_enabled() {
        let client = RemoteProgressClient::new(
            &config.remote.base_url,
            &config.remote.token,
            &user_id,
            config.remote.timeout(),
        )?;
        run_progress(ProgressReconciler::new(client), &user_id, action).await
    } else {
        let db = Database::open(&config.database.path)?;
        run_progress(ProgressReconciler::new(db), &user_id, action).await
    }
}

async fn run_progress<R: ProgressRemote>(
    reconciler: ProgressReconciler<R>,
    user_id: &str,
    action: ProgressCommand,
) -> anyhow::Result<()> {
    match action {
        ProgressCommand::Record {
            work_id,
            chapter,
            position,
        } => {
            let progress = reconciler
                .record_progress(user_id, &work_id, chapter, position)
                .await?;
            print_progress(&progress);
        }

        ProgressCommand::Get { work_id } => {
            match reconciler.get_progress(user_id, &work_id).await? {
                Some(progress) => print_progress(&progress),
                None => println!("No progress for {}.", work_id),
            }
        }

        ProgressCommand::Complete { work_id, undo } => {
            let progress = reconciler.mark_completed(user_id, &work_id, !undo).await?;
            print_progress(&progress);
        }

        ProgressCommand::List => {
            let records = reconciler.list_progress(user_id).await?;
            if records.is_empty() {
                println!("Nothing read yet.");
            } else {
                println!("{:<40} {:>8} {:>6} {:<5} LAST READ", "WORK", "CHAPTER", "READ", "DONE");
                println!("{}", "-".repeat(80));
                for p in records {
                    println!(
                        "{:<40} {:>8} {:>6} {:<5} {}",
                        p.work_id,
                        p.current_chapter,
                        p.chapters_read.len(),
                        if p.is_completed { "yes" } else { "no" },
                        db::millis_to_datetime(p.last_read_at).format("%Y-%m-%d %H:%M")
                    );
                }
            }
        }
    }

    Ok(())
}

fn print_progress(progress: &ReadingProgress) {
    let read: Vec<String> = progress
        .chapters_read
        .iter()
        .map(|n| n.to_string())
        .collect();
    println!("Work:      {}", progress.work_id);
    println!(
        "Position:  chapter {} @ {}",
        progress.current_chapter, progress.current_position
    );
    println!("Read:      {}", read.join(", "));
    println!("Completed: {}", if progress.is_completed { "yes" } else { "no" });
    println!(
        "Last read: {}",
        db::millis_to_datetime(progress.last_read_at).format("%Y-%m-%d %H:%M")
    );
}

fn format_seconds(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Start the server.
async fn cmd_serve(mut config: Config, bind: Option<std::net::SocketAddr>) -> anyhow::Result<()> {
    if let Some(addr) = bind {
        config.server.bind = addr;
    }

    let db = Database::open(&config.database.path)?;
    let auth = AuthService::new(db.clone(), config.auth.session_days);

    let expired = db.cleanup_expired_sessions()?;
    if expired > 0 {
        tracing::info!(expired, "Removed expired sync tokens");
    }

    tracing::info!(
        bind = %config.server.bind,
        database = %config.database.path.display(),
        "Starting novel-sync server"
    );

    let bind_addr = config.server.bind;
    let state = server::AppState::new(db, auth);
    let app = server::create_router(state);

    let listener = TcpListener::bind(bind_addr).await?;
    tracing::info!(address = %bind_addr, "Server listening");

    axum::serve(listener, app).await?;

    Ok(())
}

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn};

use procsentry::events::{ProcessSummary, WindowHandle};
use procsentry::services::{
    create_platform, ChannelDispatcher, Platform, ProcessQuery, ProcessSnapshotProvider, ProcessTracker,
    WindowActivator,
};
use procsentry::utils;
use procsentry::Config;

#[derive(Parser, Debug)]
#[command(name = "procsentry")]
#[command(about = "Отслеживание процессов и окон игрового клиента с надёжной активацией окон")]
struct Args {
    /// Путь к файлу конфигурации
    #[arg(short, long, default_value = "procsentry.toml")]
    config: String,

    /// Режим сухого запуска (виртуальный рабочий стол вместо ОС)
    #[arg(long)]
    dry_run: bool,

    /// Уровень логирования (перекрывает конфигурацию)
    #[arg(long)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Непрерывный мониторинг до Ctrl+C (по умолчанию)
    Monitor,
    /// Разово вывести подходящие процессы
    List {
        /// Паттерн имени вместо фильтра из конфигурации
        #[arg(long)]
        pattern: Option<String>,
        #[arg(long)]
        json: bool,
    },
    /// Вывести окно на передний план
    Activate {
        /// Дескриптор окна (десятичный или 0x...)
        #[arg(long, conflicts_with = "pid", required_unless_present = "pid")]
        handle: Option<String>,
        /// pid процесса: активируется его главное окно
        #[arg(long)]
        pid: Option<u32>,
        #[arg(long)]
        timeout_ms: Option<u64>,
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Загрузка конфигурации
    let config = Config::load(&args.config)?;

    // Инициализация системы логирования
    let level = args.log_level.as_deref().unwrap_or(&config.logging.level);
    init_tracing(level, &config.logging.format)?;

    info!("Запуск procsentry v{}", env!("CARGO_PKG_VERSION"));
    info!("Конфигурация загружена из: {}", args.config);

    if args.dry_run {
        warn!("Режим сухого запуска - вместо ОС используется виртуальный рабочий стол");
    } else {
        utils::check_environment();
    }

    let platform = create_platform(args.dry_run)?;

    match args.command.unwrap_or(Command::Monitor) {
        Command::Monitor => run_monitor(config, platform).await,
        Command::List { pattern, json } => run_list(&config, &platform, pattern.as_deref(), json).await,
        Command::Activate {
            handle,
            pid,
            timeout_ms,
            json,
        } => run_activate(&config, &platform, handle.as_deref(), pid, timeout_ms, json).await,
    }
}

fn process_query(config: &Config, platform: &Platform) -> ProcessQuery {
    let settings = config.tracker_settings();
    let snapshots = ProcessSnapshotProvider::new(
        platform.processes.clone(),
        platform.windows.clone(),
        settings.enumeration_timeout,
    );
    ProcessQuery::new(snapshots, settings.enumeration_timeout)
}

async fn run_monitor(config: Config, platform: Platform) -> Result<()> {
    // Отдельный поток-потребитель событий, как UI-поток у настоящего клиента
    let dispatcher = Arc::new(ChannelDispatcher::spawn("event-dispatch")?);
    let tracker = ProcessTracker::new(platform.clone(), dispatcher.clone(), config.tracker_settings());

    tracker.subscribe(|event| info!("{}", event));
    tracker.register_discovery_watch(config.discovery_filter());
    for pid in &config.discovery.track_pids {
        tracker.track_pid(*pid);
    }

    let status = tracker.start_monitoring(config.poll_interval())?;
    info!(
        "Наблюдатели: процессы={}, заголовки={}",
        status.lifecycle, status.title_change
    );

    let demo_handle = platform
        .virtual_desktop
        .clone()
        .map(|desktop| tokio::spawn(desktop.run_demo()));

    info!("Мониторинг запущен, Ctrl+C для выхода");

    // Ожидание сигнала завершения
    match signal::ctrl_c().await {
        Ok(()) => {
            info!("Получен сигнал завершения (Ctrl+C)");
        }
        Err(err) => {
            error!("Ошибка при ожидании сигнала завершения: {}", err);
        }
    }

    info!("Завершение работы...");

    if let Some(handle) = &demo_handle {
        handle.abort();
    }
    tracker.stop_monitoring();

    for record in tracker.processes() {
        info!("При остановке отслеживался: {}", record.read());
    }
    drop(tracker);

    // Ожидаем завершения задач (с таймаутом)
    let shutdown_timeout = tokio::time::Duration::from_secs(5);
    let shutdown_result = tokio::time::timeout(shutdown_timeout, async {
        if let Some(handle) = demo_handle {
            let _ = handle.await;
        }
        let _ = tokio::task::spawn_blocking(move || match Arc::try_unwrap(dispatcher) {
            Ok(dispatcher) => dispatcher.shutdown(),
            Err(shared) => shared.flush(),
        })
        .await;
    })
    .await;

    match shutdown_result {
        Ok(_) => info!("Все сервисы завершили работу корректно"),
        Err(_) => warn!("Таймаут при завершении сервисов"),
    }

    info!("procsentry завершил работу");
    Ok(())
}

async fn run_list(config: &Config, platform: &Platform, pattern: Option<&str>, json: bool) -> Result<()> {
    let query = process_query(config, platform);
    let filter = config.discovery_filter();
    let pattern = pattern.map(str::to_string);

    let records = tokio::task::spawn_blocking(move || match pattern {
        Some(pattern) => query.find_by_pattern(&pattern),
        None => query.find_matching(&filter),
    })
    .await
    .context("Задача перечисления процессов прервана")??;

    let summaries: Vec<ProcessSummary> = records.iter().map(ProcessSummary::from).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(());
    }

    if summaries.is_empty() {
        println!("Подходящих процессов не найдено");
    }
    for summary in &summaries {
        println!(
            "{:>7}  {:<24} {:>12}  {}{}",
            summary.process_id,
            summary.name,
            summary.main_window_handle.to_string(),
            summary.main_window_title,
            if summary.is_responding { "" } else { "  [не отвечает]" }
        );
    }
    Ok(())
}

async fn run_activate(
    config: &Config,
    platform: &Platform,
    handle: Option<&str>,
    pid: Option<u32>,
    timeout_ms: Option<u64>,
    json: bool,
) -> Result<()> {
    let handle = match (handle, pid) {
        (Some(text), _) => {
            WindowHandle::parse(text).with_context(|| format!("Неверный дескриптор окна: {}", text))?
        }
        (None, Some(pid)) => {
            let query = process_query(config, platform);
            tokio::task::spawn_blocking(move || query.main_window(pid))
                .await
                .context("Задача поиска окна прервана")?
                .map(|window| window.handle)
                .with_context(|| format!("У процесса {} нет главного окна", pid))?
        }
        (None, None) => anyhow::bail!("Укажите --handle или --pid"),
    };

    let timeout = timeout_ms
        .map(std::time::Duration::from_millis)
        .unwrap_or_else(|| config.activation_timeout());
    let activator = WindowActivator::new(platform.windows.clone(), config.activator_settings());
    let result = activator.activate(handle, timeout).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "{}: попыток {}, {:?}",
            if result.success { "Окно активировано" } else { "Не удалось активировать окно" },
            result.attempts,
            result.duration
        );
    }

    match result.failure_reason {
        None => Ok(()),
        Some(reason) => anyhow::bail!("{}: {}", reason, reason.guidance()),
    }
}

fn init_tracing(level: &str, format: &str) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(level))?;
    let registry = tracing_subscriber::registry().with(filter);

    if format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer().compact()).init();
    }

    Ok(())
}

use tracing::{info, warn};

/// Что окружение позволяет движку
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvironmentReport {
    pub elevated: bool,
    pub display_available: bool,
    pub missing_tools: Vec<&'static str>,
}

/// Проверить окружение и предупредить о том, что ограничит работу.
///
/// Ничего не запрещает: без прав или утилит движок работает в урезанном режиме.
pub fn check_environment() -> EnvironmentReport {
    info!("Проверка окружения...");
    let report = inspect();

    if !report.display_available {
        warn!("Графическая сессия не найдена: окна перечисляться не будут");
    }
    for tool in &report.missing_tools {
        warn!("Не найдена утилита {}: часть операций с окнами недоступна", tool);
    }
    if report.elevated {
        info!("Процесс запущен с повышенными правами");
    } else {
        info!("Процесс запущен без повышенных прав");
        #[cfg(windows)]
        warn!("   Окна процессов администратора активировать не получится");
    }

    if !report.missing_tools.is_empty() || (cfg!(windows) && !report.elevated) {
        for hint in setup_hints() {
            info!("{}", hint);
        }
    }

    report
}

#[cfg(windows)]
fn inspect() -> EnvironmentReport {
    EnvironmentReport {
        elevated: crate::services::platform::is_current_process_elevated(),
        display_available: true,
        missing_tools: Vec::new(),
    }
}

#[cfg(unix)]
fn inspect() -> EnvironmentReport {
    let display_available = std::env::var_os("DISPLAY").is_some();
    let missing_tools = ["wmctrl", "xdotool"]
        .into_iter()
        .filter(|tool| !tool_in_path(tool))
        .collect();
    EnvironmentReport {
        elevated: matches!(std::env::var("USER"), Ok(user) if user == "root"),
        display_available,
        missing_tools,
    }
}

#[cfg(not(any(windows, unix)))]
fn inspect() -> EnvironmentReport {
    EnvironmentReport::default()
}

#[cfg(unix)]
fn tool_in_path(tool: &str) -> bool {
    std::env::var_os("PATH")
        .map(|paths| std::env::split_paths(&paths).any(|dir| dir.join(tool).is_file()))
        .unwrap_or(false)
}

/// Подсказки по настройке окружения
pub fn setup_hints() -> Vec<String> {
    if cfg!(windows) {
        vec![
            "# Для активации окон процессов администратора:".to_string(),
            "Запустите procsentry от имени администратора".to_string(),
        ]
    } else {
        vec![
            "# Установить утилиты управления окнами:".to_string(),
            "sudo apt install wmctrl xdotool".to_string(),
        ]
    }
}

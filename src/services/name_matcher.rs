//! Wildcard include/exclude matching over process names.
//!
//! A pattern may contain a single `*` standing for any substring. Patterns
//! without `*` require an exact (case-insensitive) match.

/// Нормализация имени или паттерна: обрезка пробелов и нижний регистр
pub fn normalize(text: &str) -> String {
    text.trim().to_lowercase()
}

/// Проверка одного паттерна против уже нормализованного имени
pub fn pattern_matches(name_lower: &str, pattern: &str) -> bool {
    let pattern = normalize(pattern);
    if pattern.is_empty() {
        return false;
    }

    let mut parts = pattern.splitn(3, '*');
    let prefix = parts.next().unwrap_or("");
    match (parts.next(), parts.next()) {
        (None, _) => name_lower == prefix,
        (Some(suffix), None) => {
            name_lower.len() >= prefix.len() + suffix.len()
                && name_lower.starts_with(prefix)
                && name_lower.ends_with(suffix)
        }
        // Больше одной звёздочки не поддерживается
        (Some(_), Some(_)) => false,
    }
}

/// Решающее правило: exclude всегда побеждает, пустой include означает «всё»
pub fn matches<I, E>(name: &str, include_patterns: I, exclude_patterns: E) -> bool
where
    I: IntoIterator,
    I::Item: AsRef<str>,
    E: IntoIterator,
    E::Item: AsRef<str>,
{
    let name_lower = normalize(name);
    if name_lower.is_empty() {
        return false;
    }

    if exclude_patterns
        .into_iter()
        .any(|pattern| pattern_matches(&name_lower, pattern.as_ref()))
    {
        return false;
    }

    let mut includes = include_patterns.into_iter().peekable();
    if includes.peek().is_none() {
        return true;
    }
    includes.any(|pattern| pattern_matches(&name_lower, pattern.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const NONE: [&str; 0] = [];

    #[test]
    fn test_wildcard_prefix() {
        assert!(matches("polproxy.exe", ["pol*"], NONE));
        assert!(matches("POL.exe", ["pol*"], NONE));
        assert!(!matches("apol.exe", ["pol*"], NONE));
    }

    #[test]
    fn test_wildcard_equals_prefix_suffix_split() {
        let names = ["game.exe", "gamepad.dll", "ga", "xgame.exe", "game", "GAME.EXE"];
        let patterns = ["game*.exe", "*exe", "g*", "*", "ga*ga"];
        for pattern in patterns {
            let (prefix, suffix) = pattern.split_once('*').unwrap();
            for name in names {
                let lower = name.to_lowercase();
                let expected = lower.len() >= prefix.len() + suffix.len()
                    && lower.starts_with(prefix)
                    && lower.ends_with(suffix);
                assert_eq!(matches(name, [pattern], NONE), expected, "{} vs {}", name, pattern);
            }
        }
    }

    #[test]
    fn test_exact_match_without_wildcard() {
        assert!(matches("Game.exe", ["game.exe"], NONE));
        assert!(!matches("game.exe.bak", ["game.exe"], NONE));
    }

    #[test]
    fn test_exclude_dominates() {
        assert!(!matches("x", ["x"], ["x"]));
        assert!(!matches("polproxy.exe", ["pol*"], ["*proxy.exe"]));
        assert!(matches("pol.exe", ["pol*"], ["*proxy.exe"]));
    }

    #[test]
    fn test_empty_include_matches_all() {
        assert!(matches("anything.exe", NONE, NONE));
        assert!(!matches("anything.exe", NONE, ["any*"]));
    }

    #[test]
    fn test_malformed_input_rejects() {
        assert!(!matches("", NONE, NONE));
        assert!(!matches("   ", ["*"], NONE));
        assert!(!matches("game.exe", [""], NONE));
        assert!(!matches("game.exe", ["g*m*e"], NONE));
    }
}

use std::path::PathBuf;

// NOTE: This relies on HOME (USERPROFILE on Windows). Falling back to getpwuid would
// pull in libc for one lookup, an unset HOME leaves `~` unexpanded instead.
#[cfg(not(target_os = "windows"))]
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME").map(PathBuf::from)
}

#[cfg(target_os = "windows")]
pub fn home_dir() -> Option<PathBuf> {
    std::env::var_os("USERPROFILE").map(PathBuf::from)
}

pub fn expand_tilde(path: &str) -> PathBuf {
    let rest = match path.strip_prefix('~') {
        Some(rest) => rest,
        None => return PathBuf::from(path),
    };

    match home_dir() {
        Some(home) => home.join(rest.trim_start_matches(|c: char| c == '/' || c == '\\')),
        None => PathBuf::from(path),
    }
}

pub fn current_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

pub fn host_name() -> String {
    if let Ok(host) = std::env::var("HOSTNAME") {
        if !host.is_empty() {
            return host;
        }
    }

    std::fs::read_to_string("/proc/sys/kernel/hostname")
        .or_else(|_| std::fs::read_to_string("/etc/hostname"))
        .map(|h| h.trim().to_string())
        .ok()
        .filter(|h| !h.is_empty())
        .or_else(|| std::env::var("COMPUTERNAME").ok())
        .unwrap_or_else(|| "unknown".to_string())
}

pub fn command_line() -> String {
    std::env::args().collect::<Vec<_>>().join(" ")
}

//! Browser user-data directory resolution.
//!
//! The automation engine copies any user-data dir it does not recognize as
//! its own into a throwaway temp dir, which silently discards login state.
//! Directories whose path carries the engine's isolation marker are used
//! as-is; a *system* Chrome profile is seed-copied once into a persistent
//! automation dir that carries the marker, so login state survives runs.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

/// Path fragment the engine treats as "already isolated, do not copy".
const ISOLATION_MARKER: &str = "browser-use-user-data-dir-";

/// Name of the persistent automation profile dir created next to the
/// process working directory.
const PERSIST_DIR_NAME: &str = "browser-use-user-data-dir-persist";

/// Whether a path points into a platform-default Chrome user-data dir.
pub fn is_system_chrome_user_data_dir(user_data_dir: &Path) -> bool {
    let s = user_data_dir.to_string_lossy().to_lowercase();
    [
        "library/application support/google/chrome", // macOS
        "appdata/local/google/chrome/user data",     // Windows
        "appdata/roaming/google/chrome/user data",   // Windows
        ".config/google-chrome",                     // Linux
    ]
    .iter()
    .any(|token| s.contains(token))
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return Path::new(&home).join(rest);
        }
    }
    PathBuf::from(path)
}

fn copy_dir_all(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            std::fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Seed-copy a system profile into the persistent automation dir, first
/// time only. Returns whether a seed copy actually happened.
pub fn seed_persistent_profile_if_needed(
    src_user_data_dir: &Path,
    dst_user_data_dir: &Path,
    profile_directory: &str,
) -> bool {
    let dst_profile_dir = dst_user_data_dir.join(profile_directory);
    let dst_local_state = dst_user_data_dir.join("Local State");
    if dst_profile_dir.exists() && dst_local_state.exists() {
        return false;
    }

    if let Err(e) = std::fs::create_dir_all(dst_user_data_dir) {
        warn!("Failed to create persistent profile dir: {e}");
        return false;
    }

    let src_profile_dir = src_user_data_dir.join(profile_directory);
    if src_profile_dir.exists() {
        match copy_dir_all(&src_profile_dir, &dst_profile_dir) {
            Ok(()) => info!("Prepared persistent browser profile: {}", dst_profile_dir.display()),
            Err(e) => {
                warn!("Failed to copy browser profile: {e}");
                let _ = std::fs::create_dir_all(&dst_profile_dir);
            }
        }
    } else {
        let _ = std::fs::create_dir_all(&dst_profile_dir);
    }

    let src_local_state = src_user_data_dir.join("Local State");
    if src_local_state.exists() && !dst_local_state.exists() {
        let _ = std::fs::copy(&src_local_state, &dst_local_state);
    }
    true
}

/// Resolve the user-data dir to hand to the engine. `None` in, `None` out.
pub fn resolve_user_data_dir(
    chrome_executable_path: Option<&str>,
    chrome_user_data_dir: Option<&str>,
    profile_directory: &str,
) -> Option<PathBuf> {
    let persist_root = std::env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(PERSIST_DIR_NAME);
    resolve_with_persist_dir(
        chrome_executable_path,
        chrome_user_data_dir,
        profile_directory,
        &persist_root,
    )
}

fn resolve_with_persist_dir(
    chrome_executable_path: Option<&str>,
    chrome_user_data_dir: Option<&str>,
    profile_directory: &str,
    persist_dir: &Path,
) -> Option<PathBuf> {
    let raw = chrome_user_data_dir?;
    let expanded = expand_tilde(raw);

    // Already isolated: the engine will use it in place.
    if expanded
        .to_string_lossy()
        .to_lowercase()
        .contains(ISOLATION_MARKER)
    {
        return Some(expanded);
    }

    let is_chrome = chrome_executable_path
        .map(|p| p.to_lowercase().contains("chrome"))
        .unwrap_or(false);

    if is_chrome && is_system_chrome_user_data_dir(&expanded) {
        let did_seed =
            seed_persistent_profile_if_needed(&expanded, persist_dir, profile_directory);
        if did_seed {
            info!(
                "System Chrome profile would not persist login state; \
                 seed-copied to persistent automation profile: {}",
                persist_dir.display()
            );
        }
        return Some(persist_dir.to_path_buf());
    }

    Some(expanded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_in_none_out() {
        assert!(resolve_user_data_dir(Some("/usr/bin/google-chrome"), None, "Default").is_none());
    }

    #[test]
    fn isolated_dir_passes_through() {
        let resolved = resolve_user_data_dir(
            Some("/usr/bin/google-chrome"),
            Some("/data/browser-use-user-data-dir-persist"),
            "Default",
        )
        .unwrap();
        assert_eq!(
            resolved,
            PathBuf::from("/data/browser-use-user-data-dir-persist")
        );
    }

    #[test]
    fn non_system_dir_passes_through() {
        let resolved = resolve_user_data_dir(
            Some("/usr/bin/google-chrome"),
            Some("/data/automation-profile"),
            "Default",
        )
        .unwrap();
        assert_eq!(resolved, PathBuf::from("/data/automation-profile"));
    }

    #[test]
    fn detects_system_chrome_dirs() {
        assert!(is_system_chrome_user_data_dir(Path::new(
            "/home/u/.config/google-chrome"
        )));
        assert!(is_system_chrome_user_data_dir(Path::new(
            "/Users/u/Library/Application Support/Google/Chrome"
        )));
        assert!(!is_system_chrome_user_data_dir(Path::new(
            "/data/automation-profile"
        )));
    }

    #[test]
    fn system_dir_is_seeded_once_into_persist_dir() {
        let src = tempfile::tempdir().unwrap();
        // Shape the source like ~/.config/google-chrome.
        let system_dir = src.path().join(".config/google-chrome");
        std::fs::create_dir_all(system_dir.join("Default")).unwrap();
        std::fs::write(system_dir.join("Default/Preferences"), "{}").unwrap();
        std::fs::write(system_dir.join("Local State"), "{}").unwrap();

        let persist = tempfile::tempdir().unwrap();
        let persist_dir = persist.path().join(PERSIST_DIR_NAME);

        let resolved = resolve_with_persist_dir(
            Some("/usr/bin/google-chrome"),
            Some(system_dir.to_str().unwrap()),
            "Default",
            &persist_dir,
        )
        .unwrap();

        assert_eq!(resolved, persist_dir);
        assert!(persist_dir.join("Default/Preferences").exists());
        assert!(persist_dir.join("Local State").exists());

        // Second resolution reuses the seeded dir without copying again.
        std::fs::write(persist_dir.join("Default/Preferences"), "edited").unwrap();
        let resolved_again = resolve_with_persist_dir(
            Some("/usr/bin/google-chrome"),
            Some(system_dir.to_str().unwrap()),
            "Default",
            &persist_dir,
        )
        .unwrap();
        assert_eq!(resolved_again, persist_dir);
        let contents = std::fs::read_to_string(persist_dir.join("Default/Preferences")).unwrap();
        assert_eq!(contents, "edited");
    }

    #[test]
    fn non_chrome_executable_skips_seeding() {
        let resolved = resolve_user_data_dir(
            Some("/usr/bin/firefox"),
            Some("/home/u/.config/google-chrome"),
            "Default",
        )
        .unwrap();
        assert_eq!(resolved, PathBuf::from("/home/u/.config/google-chrome"));
    }
}

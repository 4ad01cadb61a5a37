use std::env;
use std::path::PathBuf;

/// Hard cap on change-request tickets per project
pub const MAX_CHANGE_REQUESTS_PER_PROJECT: i64 = 2;

/// Rejection reason recorded when the deciding vote carries no comment
pub const DEFAULT_REJECTION_REASON: &str = "Rejected without a stated reason";

/// Get the path to the Worklane directory (~/.worklane)
pub fn worklane_dir() -> PathBuf {
    // First try HOME environment variable (useful for tests)
    if let Ok(home) = env::var("HOME") {
        PathBuf::from(home).join(".worklane")
    } else {
        // Fall back to dirs crate for normal usage
        dirs::home_dir()
            .expect("Unable to get home directory")
            .join(".worklane")
    }
}

/// Get the path to the default database file (~/.worklane/worklane.db)
pub fn database_file() -> PathBuf {
    worklane_dir().join("worklane.db")
}

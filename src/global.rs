use crate::error::{Error, Result};
use once_cell::sync::OnceCell;
use std::str::FromStr;

static SETTINGS: OnceCell<Settings> = OnceCell::new();

/// Tunables shared by every component.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Settings {
    /// How many recently visited communities are kept per user.
    pub recent_communities_limit: usize,
    /// Rows fetched per round trip when streaming replies.
    pub reply_batch_size: u64,
    /// Attempts per unit before a write conflict is surfaced.
    pub conflict_retries: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recent_communities_limit: 5,
            reply_batch_size: 50,
            conflict_retries: 3,
        }
    }
}

fn var_or<T: FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(value) => value.trim().parse::<T>().map_err(|_| {
            Error::Validation(format!("{} cannot be parsed: {:?}", key, value))
        }),
        Err(_) => Ok(default),
    }
}

impl Settings {
    /// Reads overrides from `RECENT_COMMUNITIES_LIMIT`, `REPLY_BATCH_SIZE`
    /// and `CONFLICT_RETRIES`.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        let settings = Self {
            recent_communities_limit: var_or(
                "RECENT_COMMUNITIES_LIMIT",
                defaults.recent_communities_limit,
            )?,
            reply_batch_size: var_or("REPLY_BATCH_SIZE", defaults.reply_batch_size)?,
            conflict_retries: var_or("CONFLICT_RETRIES", defaults.conflict_retries)?,
        };

        if settings.recent_communities_limit == 0 {
            return Err(Error::Validation(
                "RECENT_COMMUNITIES_LIMIT must be at least 1".to_owned(),
            ));
        }
        if settings.reply_batch_size == 0 {
            return Err(Error::Validation(
                "REPLY_BATCH_SIZE must be at least 1".to_owned(),
            ));
        }

        Ok(settings)
    }
}

/// Process-wide settings. Falls back to defaults if `init` never ran.
pub fn get_settings() -> Settings {
    SETTINGS.get().copied().unwrap_or_default()
}

pub fn init() -> Result<Settings> {
    let settings = Settings::from_env()?;
    if SETTINGS.set(settings).is_err() {
        log::warn!("settings were already initialized, keeping the first ones");
    }
    Ok(get_settings())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.recent_communities_limit, 5);
        assert_eq!(settings.reply_batch_size, 50);
        assert_eq!(settings.conflict_retries, 3);
    }

    #[test]
    fn test_var_or_rejects_garbage() {
        std::env::set_var("TALLYHO_TEST_GARBAGE", "lots");
        assert!(matches!(
            var_or::<u32>("TALLYHO_TEST_GARBAGE", 1),
            Err(Error::Validation(_))
        ));
        assert_eq!(var_or::<u32>("TALLYHO_TEST_UNSET", 7).ok(), Some(7));
    }
}

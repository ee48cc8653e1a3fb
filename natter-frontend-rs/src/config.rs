use parrot::MergePolicy;
use parrot::supabase::SupabaseConfig;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("Invalid value `{value}` for {name}, expected {expected}")]
    Invalid {
        name: &'static str,
        value: String,
        expected: &'static str,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendKind {
    /// Everything stays in this process. Useful for trying the client out offline.
    Memory,
    Supabase {
        connection: SupabaseConfig,
        email: String,
        password: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Config {
    pub backend: BackendKind,
    /// The identity used with the in-memory backend.
    pub user: Option<String>,
    pub table: String,
    pub merge: MergePolicy,
    /// How many messages to show at once.
    pub view_rows: usize,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        let backend = match var("NATTER_BACKEND").as_deref().unwrap_or("memory") {
            "memory" => BackendKind::Memory,
            "supabase" => BackendKind::Supabase {
                connection: SupabaseConfig {
                    supabase_url: var("SUPABASE_URL").ok_or(ConfigError::Missing("SUPABASE_URL"))?,
                    supabase_anon_key: var("SUPABASE_ANON_KEY")
                        .ok_or(ConfigError::Missing("SUPABASE_ANON_KEY"))?,
                },
                email: var("NATTER_EMAIL").ok_or(ConfigError::Missing("NATTER_EMAIL"))?,
                password: var("NATTER_PASSWORD").ok_or(ConfigError::Missing("NATTER_PASSWORD"))?,
            },
            other => {
                return Err(ConfigError::Invalid {
                    name: "NATTER_BACKEND",
                    value: other.to_string(),
                    expected: "`memory` or `supabase`",
                });
            }
        };

        let merge = match var("NATTER_MERGE").as_deref().unwrap_or("baseline") {
            "baseline" => MergePolicy::Baseline,
            "reconcile" => MergePolicy::Reconcile,
            other => {
                return Err(ConfigError::Invalid {
                    name: "NATTER_MERGE",
                    value: other.to_string(),
                    expected: "`baseline` or `reconcile`",
                });
            }
        };

        let view_rows = match var("NATTER_VIEW_ROWS") {
            None => 20,
            Some(raw) => raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|rows| *rows > 0)
                .ok_or(ConfigError::Invalid {
                    name: "NATTER_VIEW_ROWS",
                    value: raw,
                    expected: "a positive number",
                })?,
        };

        Ok(Self {
            backend,
            user: var("NATTER_USER"),
            table: var("NATTER_TABLE").unwrap_or_else(|| "messages".to_string()),
            merge,
            view_rows,
        })
    }
}

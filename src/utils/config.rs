use std::env;
use std::path::PathBuf;

use crate::pipeline::matcher::DEFAULT_TOLERANCE;

#[derive(Clone, Debug)]
pub struct Config {
    pub data: PathBuf,
    pub upload_dir: PathBuf,
    pub port: u16,
    pub batch_limit: usize,
    pub roster_limit: usize,
    pub match_tolerance: f32,
    pub frontend_url: String,
}

impl Config {
    pub fn from_env() -> Self {
        let data = env::var("FACELENS_DATA").unwrap_or_else(|_| "/facelens-data".to_string());
        let upload_dir = env::var("FACELENS_UPLOAD_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(&data).join("uploads"));
        let port = env::var("FACELENS_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8000);
        let batch_limit = env::var("FACELENS_BATCH_LIMIT").ok().and_then(|v| v.parse().ok()).unwrap_or(100);
        let roster_limit = env::var("FACELENS_ROSTER_LIMIT").ok().and_then(|v| v.parse().ok()).unwrap_or(1000);
        let match_tolerance = env::var("FACELENS_MATCH_TOLERANCE").ok().and_then(|v| v.parse().ok()).unwrap_or(DEFAULT_TOLERANCE);
        let frontend_url = env::var("FACELENS_FRONTEND_URL").unwrap_or_else(|_| "https://localhost:3000".to_string());
        Self {
            data: PathBuf::from(data),
            upload_dir,
            port,
            batch_limit,
            roster_limit,
            match_tolerance,
            frontend_url,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_vars(vars: &[&str]) -> Vec<(String, Option<String>)> {
        let mut saved = Vec::new();
        for &k in vars {
            let prev = env::var(k).ok();
            saved.push((k.to_string(), prev));
            env::remove_var(k);
        }
        saved
    }

    fn restore_vars(saved: Vec<(String, Option<String>)>) {
        for (k, v) in saved {
            if let Some(val) = v {
                env::set_var(k, val);
            } else {
                env::remove_var(k);
            }
        }
    }

    #[test]
    fn test_config_defaults() {
        let saved = clear_vars(&[
            "FACELENS_DATA",
            "FACELENS_UPLOAD_DIR",
            "FACELENS_PORT",
            "FACELENS_BATCH_LIMIT",
            "FACELENS_ROSTER_LIMIT",
            "FACELENS_MATCH_TOLERANCE",
            "FACELENS_FRONTEND_URL",
        ]);

        let config = Config::from_env();
        assert_eq!(config.data, PathBuf::from("/facelens-data"));
        assert_eq!(config.upload_dir, PathBuf::from("/facelens-data/uploads"));
        assert_eq!(config.port, 8000);
        assert_eq!(config.batch_limit, 100);
        assert_eq!(config.roster_limit, 1000);
        assert_eq!(config.match_tolerance, 0.6);

        restore_vars(saved);
    }

    #[test]
    fn test_config_from_env() {
        let saved = clear_vars(&[
            "FACELENS_DATA",
            "FACELENS_UPLOAD_DIR",
            "FACELENS_PORT",
            "FACELENS_BATCH_LIMIT",
            "FACELENS_ROSTER_LIMIT",
            "FACELENS_MATCH_TOLERANCE",
            "FACELENS_FRONTEND_URL",
        ]);

        env::set_var("FACELENS_DATA", "/custom/data");
        env::set_var("FACELENS_UPLOAD_DIR", "/custom/uploads");
        env::set_var("FACELENS_PORT", "8080");
        env::set_var("FACELENS_BATCH_LIMIT", "25");
        env::set_var("FACELENS_ROSTER_LIMIT", "50");
        env::set_var("FACELENS_MATCH_TOLERANCE", "0.45");

        let config = Config::from_env();
        assert_eq!(config.data, PathBuf::from("/custom/data"));
        assert_eq!(config.upload_dir, PathBuf::from("/custom/uploads"));
        assert_eq!(config.port, 8080);
        assert_eq!(config.batch_limit, 25);
        assert_eq!(config.roster_limit, 50);
        assert_eq!(config.match_tolerance, 0.45);

        restore_vars(saved);
    }
}

use std::{
    env, fs,
    path::{Path, PathBuf},
    str::FromStr,
    time::Duration,
};

use crate::{
    cache, classifier,
    errors::Error,
    keywords::{KeywordMatcher, DEFAULT_KEYWORDS},
    retry::RetryPolicy,
    Result,
};

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

/// Typed configuration, loaded once at startup from the environment (and `.env`).
///
/// Every value is validated here; command-specific requirements are checked
/// with the `require_*` helpers before the command touches the network or disk.
#[derive(Clone, Debug)]
pub struct Config {
    // Classifier endpoint
    pub openrouter_api_key: Option<String>,
    pub openrouter_base_url: String,
    pub ai_model: String,
    pub ai_validation_prompt: String,
    pub classify_delay: Duration,
    pub classifier_max_attempts: u32,
    pub classifier_backoff: Duration,
    pub classifier_timeout: Duration,
    pub classifier_max_messages: usize,

    // Telegram capability
    pub telegram_bot_token: Option<String>,
    pub api_delay: Duration,
    pub page_size: usize,
    pub max_common_groups: usize,
    pub profile_cache_size: usize,

    // Output
    pub data_folder: PathBuf,
    pub csv_delimiter: u8,
    pub csv_encoding: String,
    pub progress_update_frequency: usize,
    pub keywords: Vec<String>,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the process environment in production).
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| get(key).and_then(non_empty);

        let openrouter_api_key = get("OPENROUTER_API_KEY");
        let openrouter_base_url = get("OPENROUTER_BASE_URL")
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
            .trim_end_matches('/')
            .to_string();
        if !openrouter_base_url.starts_with("http://") && !openrouter_base_url.starts_with("https://")
        {
            return Err(Error::Config(format!(
                "OPENROUTER_BASE_URL must be an http(s) URL, got {openrouter_base_url:?}"
            )));
        }
        let ai_model = get("AI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string());
        let ai_validation_prompt = get("AI_VALIDATION_PROMPT")
            .unwrap_or_else(|| classifier::DEFAULT_INSTRUCTIONS.to_string());

        let classify_delay = Duration::from_millis(parse::<u64>(&get, "CLASSIFY_DELAY_MS")?.unwrap_or(1000));
        let classifier_max_attempts = parse::<u32>(&get, "CLASSIFIER_MAX_ATTEMPTS")?.unwrap_or(3);
        if classifier_max_attempts == 0 {
            return Err(Error::Config(
                "CLASSIFIER_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        let classifier_backoff =
            Duration::from_millis(parse::<u64>(&get, "CLASSIFIER_BACKOFF_MS")?.unwrap_or(1000));
        let classifier_timeout =
            Duration::from_secs(parse::<u64>(&get, "CLASSIFIER_TIMEOUT_SECS")?.unwrap_or(30));
        let classifier_max_messages = parse::<usize>(&get, "CLASSIFIER_MAX_MESSAGES")?
            .unwrap_or(classifier::DEFAULT_MAX_MESSAGES);

        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN");
        let api_delay = Duration::from_millis(parse::<u64>(&get, "API_DELAY_MS")?.unwrap_or(200));
        let page_size = parse::<usize>(&get, "PAGE_SIZE")?.unwrap_or(100);
        if page_size == 0 {
            return Err(Error::Config("PAGE_SIZE must be at least 1".to_string()));
        }
        let max_common_groups = parse::<usize>(&get, "MAX_COMMON_GROUPS")?.unwrap_or(5);
        let profile_cache_size =
            parse::<usize>(&get, "PROFILE_CACHE_SIZE")?.unwrap_or(cache::DEFAULT_CAPACITY);
        if profile_cache_size == 0 {
            return Err(Error::Config(
                "PROFILE_CACHE_SIZE must be at least 1".to_string(),
            ));
        }

        let data_folder = PathBuf::from(get("DATA_FOLDER").unwrap_or_else(|| "data".to_string()));
        let csv_delimiter = parse_delimiter(get("CSV_DELIMITER"))?;
        let csv_encoding = get("CSV_ENCODING").unwrap_or_else(|| "UTF-8".to_string());
        if !matches!(csv_encoding.to_lowercase().as_str(), "utf-8" | "utf8") {
            return Err(Error::Config(format!(
                "CSV_ENCODING {csv_encoding:?} is not supported (only UTF-8)"
            )));
        }
        let progress_update_frequency =
            parse::<usize>(&get, "PROGRESS_UPDATE_FREQUENCY")?.unwrap_or(25);
        if progress_update_frequency == 0 {
            return Err(Error::Config(
                "PROGRESS_UPDATE_FREQUENCY must be at least 1".to_string(),
            ));
        }

        let keywords = match get("KEYWORDS") {
            Some(list) => {
                let kw = parse_csv_lower(&list);
                if kw.is_empty() {
                    return Err(Error::Config("KEYWORDS is set but empty".to_string()));
                }
                kw
            }
            None => DEFAULT_KEYWORDS.iter().map(|s| s.to_string()).collect(),
        };

        Ok(Self {
            openrouter_api_key,
            openrouter_base_url,
            ai_model,
            ai_validation_prompt,
            classify_delay,
            classifier_max_attempts,
            classifier_backoff,
            classifier_timeout,
            classifier_max_messages,
            telegram_bot_token,
            api_delay,
            page_size,
            max_common_groups,
            profile_cache_size,
            data_folder,
            csv_delimiter,
            csv_encoding,
            progress_update_frequency,
            keywords,
        })
    }

    /// Credential for the classifier endpoint; required by classification runs.
    pub fn require_classifier(&self) -> Result<&str> {
        self.openrouter_api_key.as_deref().ok_or_else(|| {
            Error::Config(
                "OPENROUTER_API_KEY environment variable is required for classification".to_string(),
            )
        })
    }

    /// Bot token for profile lookups; required by detailed scrapes.
    pub fn require_bot_token(&self) -> Result<&str> {
        self.telegram_bot_token.as_deref().ok_or_else(|| {
            Error::Config(
                "TELEGRAM_BOT_TOKEN environment variable is required for detailed mode".to_string(),
            )
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.classifier_max_attempts,
            initial_backoff: self.classifier_backoff,
        }
    }

    pub fn keyword_matcher(&self) -> KeywordMatcher {
        KeywordMatcher::new(&self.keywords)
    }

    pub fn ensure_data_folder(&self) -> Result<()> {
        fs::create_dir_all(&self.data_folder)?;
        Ok(())
    }
}

fn parse<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>> {
    let Some(raw) = get(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|_| Error::Config(format!("{key} has an invalid value: {raw:?}")))
}

fn parse_delimiter(v: Option<String>) -> Result<u8> {
    let Some(v) = v else {
        return Ok(b',');
    };
    let v = if v == "\\t" { "\t".to_string() } else { v };
    match v.as_bytes() {
        [b] if b.is_ascii() && *b != b'"' && *b != b'\n' && *b != b'\r' => Ok(*b),
        _ => Err(Error::Config(format!(
            "CSV_DELIMITER must be a single ASCII character, got {v:?}"
        ))),
    }
}

/// Variables already present in the environment win over `.env`.
fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };
    for (key, val) in parse_dotenv(&contents) {
        if env::var_os(&key).is_none() {
            env::set_var(key, val);
        }
    }
}

/// `KEY=value` lines; `#` comments, an `export ` prefix and one pair of
/// surrounding quotes are accepted.
fn parse_dotenv(contents: &str) -> Vec<(String, String)> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let line = line.strip_prefix("export ").unwrap_or(line);
            let (k, v) = line.split_once('=')?;
            let key = k.trim();
            if key.is_empty() {
                return None;
            }
            let v = v.trim();
            let unquoted = [('"', '"'), ('\'', '\'')]
                .iter()
                .find_map(|&(open, close)| v.strip_prefix(open)?.strip_suffix(close))
                .unwrap_or(v);
            Some((key.to_string(), unquoted.to_string()))
        })
        .collect()
}

fn parse_csv_lower(v: &str) -> Vec<String> {
    v.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn cfg(pairs: &[(&str, &str)]) -> Result<Config> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let c = cfg(&[]).unwrap();
        assert_eq!(c.openrouter_api_key, None);
        assert_eq!(c.openrouter_base_url, DEFAULT_BASE_URL);
        assert_eq!(c.ai_model, DEFAULT_MODEL);
        assert_eq!(c.profile_cache_size, 50);
        assert_eq!(c.csv_delimiter, b',');
        assert_eq!(c.classify_delay, Duration::from_secs(1));
        assert_eq!(c.api_delay, Duration::from_millis(200));
        assert_eq!(c.classifier_max_attempts, 3);
        assert_eq!(c.data_folder, PathBuf::from("data"));
        assert_eq!(c.keywords.len(), DEFAULT_KEYWORDS.len());
        assert!(c.require_classifier().is_err());
        assert!(c.require_bot_token().is_err());
    }

    #[test]
    fn reads_overrides() {
        let c = cfg(&[
            ("OPENROUTER_API_KEY", "sk-test"),
            ("OPENROUTER_BASE_URL", "http://localhost:8080/v1/"),
            ("PROFILE_CACHE_SIZE", "7"),
            ("CSV_DELIMITER", "\\t"),
            ("KEYWORDS", "Casino, POKER ,,"),
            ("CLASSIFY_DELAY_MS", "0"),
        ])
        .unwrap();
        assert_eq!(c.require_classifier().unwrap(), "sk-test");
        assert_eq!(c.openrouter_base_url, "http://localhost:8080/v1");
        assert_eq!(c.profile_cache_size, 7);
        assert_eq!(c.csv_delimiter, b'\t');
        assert_eq!(c.keywords, vec!["casino", "poker"]);
        assert_eq!(c.classify_delay, Duration::ZERO);
    }

    #[test]
    fn blank_values_count_as_unset() {
        let c = cfg(&[("OPENROUTER_API_KEY", "  "), ("AI_MODEL", "")]).unwrap();
        assert_eq!(c.openrouter_api_key, None);
        assert_eq!(c.ai_model, DEFAULT_MODEL);
    }

    #[test]
    fn invalid_values_fail_fast() {
        for pairs in [
            vec![("PROFILE_CACHE_SIZE", "0")],
            vec![("PROGRESS_UPDATE_FREQUENCY", "0")],
            vec![("PROFILE_CACHE_SIZE", "fifty")],
            vec![("CLASSIFY_DELAY_MS", "-1")],
            vec![("CSV_DELIMITER", ";;")],
            vec![("CSV_DELIMITER", "§")],
            vec![("CSV_ENCODING", "cp1251")],
            vec![("CLASSIFIER_MAX_ATTEMPTS", "0")],
            vec![("OPENROUTER_BASE_URL", "openrouter.ai")],
            vec![("KEYWORDS", " , ,")],
        ] {
            let res = cfg(&pairs);
            assert!(matches!(res, Err(Error::Config(_))), "{pairs:?} should fail");
        }
    }

    #[test]
    fn dotenv_lines() {
        let parsed = parse_dotenv(
            "# classifier\nOPENROUTER_API_KEY=\"sk-1\"\nexport AI_MODEL = 'x/y'\n\n=orphan\nnot a pair\nKEYWORDS=casino,bet\n",
        );
        let pairs: Vec<(&str, &str)> = parsed
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("OPENROUTER_API_KEY", "sk-1"),
                ("AI_MODEL", "x/y"),
                ("KEYWORDS", "casino,bet"),
            ]
        );
    }
}

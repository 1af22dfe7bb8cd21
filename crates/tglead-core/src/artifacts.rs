//! Output file naming and JSON artifacts.

use std::{
    fs::{self, File},
    io::{self, BufReader, BufWriter, Write},
    path::{Path, PathBuf},
    sync::OnceLock,
};

use regex::Regex;
use serde::{de::DeserializeOwned, Serialize};

use crate::Result;

pub const MESSAGES_PREFIX: &str = "messages";
pub const USERS_PREFIX: &str = "users";
pub const FILTERED_PREFIX: &str = "filtered-users";
pub const VALIDATED_PREFIX: &str = "validated-users";
pub const LEADS_PREFIX: &str = "leads";

/// Lowercase `title` and collapse every run of characters outside `[a-z0-9]` into `-`.
pub fn sanitize_title(title: &str) -> String {
    static NON_ALNUM: OnceLock<Regex> = OnceLock::new();
    let re = NON_ALNUM.get_or_init(|| Regex::new(r"[^a-z0-9]+").expect("static regex"));
    re.replace_all(&title.to_lowercase(), "-").into_owned()
}

/// `<dir>/<prefix>-<sanitized title>-<8 hex>.<ext>`; an empty title is omitted.
pub fn artifact_path(dir: &Path, prefix: &str, title: &str, ext: &str) -> PathBuf {
    let id = uuid::Uuid::new_v4().simple().to_string();
    let short = &id[..8];
    let title = sanitize_title(title);
    let title = title.trim_matches('-');
    let name = if title.is_empty() {
        format!("{prefix}-{short}.{ext}")
    } else {
        format!("{prefix}-{title}-{short}.{ext}")
    };
    dir.join(name)
}

/// Pretty-printed JSON, written through a buffered file handle.
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, value)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

/// Most recently modified `messages-*.csv` in `dir`.
pub fn latest_message_export(dir: &Path) -> Result<Option<PathBuf>> {
    latest_artifact(dir, MESSAGES_PREFIX, "csv")
}

/// Most recently modified `validated-users-*.json` in `dir`.
pub fn latest_validated_export(dir: &Path) -> Result<Option<PathBuf>> {
    latest_artifact(dir, VALIDATED_PREFIX, "json")
}

/// Most recently modified `<prefix>-*.<ext>` in `dir`. A missing `dir` holds none.
pub fn latest_artifact(dir: &Path, prefix: &str, ext: &str) -> Result<Option<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let head = format!("{prefix}-");
    let tail = format!(".{ext}");
    let mut best: Option<(std::time::SystemTime, PathBuf)> = None;
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if !name.starts_with(&head) || !name.ends_with(&tail) {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        if best.as_ref().map_or(true, |(t, _)| modified >= *t) {
            best = Some((modified, path));
        }
    }
    Ok(best.map(|(_, p)| p))
}

#[cfg(test)]
pub(crate) mod tests {
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    use super::*;

    pub(crate) fn tmp(prefix: &str) -> PathBuf {
        let ts = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::from_secs(0))
            .as_nanos();
        let pid = std::process::id();
        let dir = PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}"));
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn sanitizes_titles() {
        assert_eq!(sanitize_title("Poker Club #1"), "poker-club-1");
        assert_eq!(sanitize_title("Казино Чат"), "-");
        assert_eq!(sanitize_title("a--b"), "a-b");
    }

    #[test]
    fn artifact_names_follow_pattern() {
        let p = artifact_path(Path::new("data"), MESSAGES_PREFIX, "Poker Club", "csv");
        let name = p.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("messages-poker-club-"), "{name}");
        assert!(name.ends_with(".csv"));
        assert_eq!(name.len(), "messages-poker-club-".len() + 8 + ".csv".len());

        let p = artifact_path(Path::new("data"), FILTERED_PREFIX, "", "json");
        let name = p.file_name().unwrap().to_str().unwrap();
        assert_eq!(name.len(), "filtered-users-".len() + 8 + ".json".len());
    }

    #[test]
    fn finds_latest_message_export() {
        let dir = tmp("tglead-artifacts");
        assert_eq!(latest_message_export(&dir).unwrap(), None);

        fs::write(dir.join("users-x.json"), "{}").unwrap();
        fs::write(dir.join("messages-a-1.csv"), "").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        fs::write(dir.join("messages-b-2.csv"), "").unwrap();

        let latest = latest_message_export(&dir).unwrap().unwrap();
        assert_eq!(latest.file_name().unwrap(), "messages-b-2.csv");

        assert_eq!(latest_validated_export(&dir).unwrap(), None);
        fs::write(dir.join("validated-users-a-1.json"), "{}").unwrap();
        let latest = latest_validated_export(&dir).unwrap().unwrap();
        assert_eq!(latest.file_name().unwrap(), "validated-users-a-1.json");
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_data_folder_has_no_exports() {
        let dir = tmp("tglead-missing").join("never-created");
        assert_eq!(latest_message_export(&dir).unwrap(), None);
        assert_eq!(latest_validated_export(&dir).unwrap(), None);
        let _ = fs::remove_dir_all(dir.parent().unwrap());
    }

    #[test]
    fn writes_pretty_json() {
        let dir = tmp("tglead-json");
        let path = dir.join("x.json");
        write_json(&path, &serde_json::json!({"a": 1})).unwrap();
        let s = fs::read_to_string(&path).unwrap();
        assert_eq!(s, "{\n  \"a\": 1\n}\n");
        let _ = fs::remove_dir_all(dir);
    }
}

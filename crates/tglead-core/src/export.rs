//! Delimited-text artifacts: the flat message export and the lead sheet.
//!
//! Writers flush after every row, so an interrupted run leaves a valid prefix
//! of complete rows behind.

use std::{
    fs::File,
    io::{Read, Write},
    path::Path,
};

use serde::Deserialize;

use crate::{
    domain::{
        format_date, join_groups, join_keywords, parse_date, split_groups, split_keywords,
        MessageRecord, UserAggregate,
    },
    errors::Error,
    Result,
};

/// Column schema of the flat message export.
pub const MESSAGE_COLUMNS: [&str; 11] = [
    "message_id",
    "date",
    "sender_id",
    "sender_username",
    "sender_name",
    "message_text",
    "group",
    "group_id",
    "sender_bio",
    "message_gaming_keywords",
    "sender_common_groups",
];

/// Column schema of the lead sheet (one row per classified user).
pub const LEAD_COLUMNS: [&str; 13] = [
    "Sender ID",
    "Username",
    "Profile URL",
    "Name",
    "Bio",
    "Common Groups",
    "Group",
    "Group ID",
    "Messages Count",
    "AI Validated",
    "Latest Message",
    "Gaming Keywords",
    "Last Message Date",
];

const LEAD_BIO_MAX: usize = 500;
const LEAD_MESSAGE_MAX: usize = 200;

/// Streams [`MessageRecord`]s to a delimited file with the fixed header.
pub struct RecordExporter<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
}

impl RecordExporter<File> {
    /// Create (truncate) `path` and write the header row.
    pub fn create(path: &Path, delimiter: u8) -> Result<Self> {
        let file = File::create(path)?;
        Self::new(file, delimiter)
    }
}

impl<W: Write> RecordExporter<W> {
    pub fn new(inner: W, delimiter: u8) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(inner);
        writer.write_record(MESSAGE_COLUMNS)?;
        writer.flush()?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn write(&mut self, r: &MessageRecord) -> Result<()> {
        self.writer.write_record([
            r.message_id.to_string(),
            format_date(&r.timestamp),
            r.sender_id.clone().unwrap_or_default(),
            r.sender_username.clone(),
            r.sender_name.clone(),
            r.text.clone(),
            r.group_name.clone(),
            r.group_id.clone(),
            r.sender_bio.clone(),
            join_keywords(&r.matched_keywords),
            join_groups(&r.sender_common_groups),
        ])?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| Error::Io(std::io::Error::new(e.error().kind(), e.error().to_string())))
    }
}

#[derive(Debug, Deserialize)]
struct MessageRow {
    message_id: String,
    date: String,
    #[serde(default)]
    sender_id: String,
    #[serde(default)]
    sender_username: String,
    #[serde(default)]
    sender_name: String,
    #[serde(default)]
    message_text: String,
    #[serde(default)]
    group: String,
    #[serde(default)]
    group_id: String,
    #[serde(default)]
    sender_bio: String,
    #[serde(default)]
    message_gaming_keywords: String,
    #[serde(default)]
    sender_common_groups: String,
}

impl TryFrom<MessageRow> for MessageRecord {
    type Error = Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        let message_id = row
            .message_id
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::Validation(format!("invalid message_id {:?}", row.message_id)))?;
        let timestamp = parse_date(&row.date)?;
        let sender_id = Some(row.sender_id.trim().to_string()).filter(|s| !s.is_empty());

        Ok(MessageRecord {
            message_id,
            timestamp,
            sender_id,
            sender_username: row.sender_username,
            sender_name: row.sender_name,
            text: row.message_text,
            group_name: row.group,
            group_id: row.group_id,
            sender_bio: row.sender_bio,
            matched_keywords: split_keywords(&row.message_gaming_keywords),
            sender_common_groups: split_groups(&row.sender_common_groups),
        })
    }
}

/// Reads a flat message export back into [`MessageRecord`]s, one row at a time.
pub struct RecordReader<R: Read> {
    reader: csv::Reader<R>,
}

impl RecordReader<File> {
    pub fn open(path: &Path, delimiter: u8) -> Result<Self> {
        let file = File::open(path)?;
        Self::new(file, delimiter)
    }
}

impl<R: Read> RecordReader<R> {
    /// Fails with [`Error::Validation`] when required columns are missing.
    pub fn new(inner: R, delimiter: u8) -> Result<Self> {
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .from_reader(inner);
        let headers = reader.headers()?;
        for required in ["message_id", "date", "sender_id"] {
            if !headers.iter().any(|h| h == required) {
                return Err(Error::Validation(format!(
                    "export is missing the {required:?} column"
                )));
            }
        }
        Ok(Self { reader })
    }

    /// Iterate rows. Malformed rows surface as [`Error::Validation`] items so the
    /// caller can skip and count them; read failures surface as [`Error::Csv`].
    pub fn records(&mut self) -> impl Iterator<Item = Result<MessageRecord>> + '_ {
        self.reader
            .deserialize::<MessageRow>()
            .map(|row| match row {
                Ok(row) => MessageRecord::try_from(row),
                Err(e) if e.is_io_error() => Err(Error::Csv(e)),
                Err(e) => Err(Error::Validation(format!("malformed row: {e}"))),
            })
    }
}

/// Streams classified [`UserAggregate`]s as a spreadsheet-friendly lead sheet.
pub struct LeadSheetExporter<W: Write> {
    writer: csv::Writer<W>,
    rows: usize,
}

impl LeadSheetExporter<File> {
    pub fn create(path: &Path, delimiter: u8) -> Result<Self> {
        let file = File::create(path)?;
        Self::new(file, delimiter)
    }
}

impl<W: Write> LeadSheetExporter<W> {
    pub fn new(inner: W, delimiter: u8) -> Result<Self> {
        let mut writer = csv::WriterBuilder::new()
            .delimiter(delimiter)
            .from_writer(inner);
        writer.write_record(LEAD_COLUMNS)?;
        writer.flush()?;
        Ok(Self { writer, rows: 0 })
    }

    pub fn write(&mut self, user: &UserAggregate) -> Result<()> {
        self.writer.write_record(lead_row(user))?;
        self.writer.flush()?;
        self.rows += 1;
        Ok(())
    }

    pub fn rows_written(&self) -> usize {
        self.rows
    }

    pub fn into_inner(self) -> Result<W> {
        self.writer
            .into_inner()
            .map_err(|e| Error::Io(std::io::Error::new(e.error().kind(), e.error().to_string())))
    }
}

/// Public profile link: `t.me` for users with a username, `tg://` deep link otherwise.
pub fn profile_url(username: &str, sender_id: &str) -> String {
    let name = username.trim_start_matches('@');
    if !name.is_empty() {
        return format!("https://t.me/{name}");
    }
    if !sender_id.is_empty() {
        return format!("tg://user?id={sender_id}");
    }
    String::new()
}

fn lead_row(user: &UserAggregate) -> [String; 13] {
    let latest = user.latest_message();
    [
        user.sender_id.clone(),
        user.sender_username.clone(),
        profile_url(&user.sender_username, &user.sender_id),
        user.sender_name.clone(),
        user.sender_bio.chars().take(LEAD_BIO_MAX).collect(),
        join_groups(&user.sender_common_groups),
        user.group.clone(),
        user.group_id.clone(),
        user.messages.len().to_string(),
        if user.validated == Some(true) { "Yes" } else { "No" }.to_string(),
        latest
            .map(|m| m.text.chars().take(LEAD_MESSAGE_MAX).collect())
            .unwrap_or_default(),
        latest
            .map(|m| join_keywords(&m.matched_keywords))
            .unwrap_or_default(),
        latest.map(|m| format_date(&m.timestamp)).unwrap_or_default(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::{aggregate, tests::record};
    use crate::domain::ClassificationResult;

    fn export(records: &[MessageRecord], delimiter: u8) -> String {
        let mut ex = RecordExporter::new(Vec::new(), delimiter).unwrap();
        for r in records {
            ex.write(r).unwrap();
        }
        assert_eq!(ex.rows_written(), records.len());
        String::from_utf8(ex.into_inner().unwrap()).unwrap()
    }

    #[test]
    fn writes_fixed_header_and_formatted_fields() {
        let mut r = record(7, Some("11"), "Casino, bets and poker");
        r.sender_common_groups = vec!["A".to_string(), "B".to_string()];
        let out = export(&[r], b',');
        let mut lines = out.lines();
        assert_eq!(lines.next().unwrap(), MESSAGE_COLUMNS.join(","));
        let row = lines.next().unwrap();
        assert!(row.starts_with("7,2024-05-01 12:07:00 UTC,11,user11,Name 7,"));
        assert!(row.contains("\"Casino, bets and poker\""));
        assert!(row.contains("\"casino, bet, poker\""));
        assert!(row.ends_with("A; B"));
    }

    #[test]
    fn exported_rows_read_back() {
        let mut no_sender = record(3, None, "hello");
        no_sender.sender_username.clear();
        let records = vec![
            record(1, Some("1"), "let's play poker tonight"),
            record(2, Some("2"), "weather is nice"),
            no_sender,
        ];
        let out = export(&records, b';');

        let mut reader = RecordReader::new(out.as_bytes(), b';').unwrap();
        let back: Vec<_> = reader.records().collect::<Result<_>>().unwrap();
        assert_eq!(back, records);
        assert!(back[1].matched_keywords.is_empty());
        assert_eq!(back[2].sender_id, None);
    }

    #[test]
    fn malformed_rows_are_validation_errors() {
        let csv = format!(
            "{}\nabc,2024-01-01 00:00:00 UTC,1,,,,,,,,\n5,not a date,1,,,,,,,,\n6,2024-01-01 00:00:00 UTC,2,,,hi,,,,,\n",
            MESSAGE_COLUMNS.join(",")
        );
        let mut reader = RecordReader::new(csv.as_bytes(), b',').unwrap();
        let rows: Vec<_> = reader.records().collect();
        assert_eq!(rows.len(), 3);
        assert!(matches!(rows[0], Err(Error::Validation(_))));
        assert!(matches!(rows[1], Err(Error::Validation(_))));
        assert_eq!(rows[2].as_ref().unwrap().message_id, 6);
    }

    #[test]
    fn missing_required_column_is_rejected() {
        let csv = "message_id,text\n1,hi\n";
        assert!(matches!(
            RecordReader::new(csv.as_bytes(), b','),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn unwritable_path_is_io_error() {
        let res = RecordExporter::create(Path::new("/nonexistent-dir/x/messages.csv"), b',');
        assert!(matches!(res, Err(Error::Io(_))));
    }

    #[test]
    fn lead_sheet_rows() {
        let rows = vec![
            record(1, Some("1"), "poker"),
            record(2, Some("1"), "cpa traffic"),
        ];
        let mut users = aggregate(&rows).unwrap();
        let user = users.get_mut("1").unwrap();
        user.attach(&ClassificationResult {
            sender_id: "1".to_string(),
            verdict: true,
            raw_model_output: "{\"valid\": true}".to_string(),
            well_formed: true,
        });

        let mut ex = LeadSheetExporter::new(Vec::new(), b',').unwrap();
        ex.write(users.get("1").unwrap()).unwrap();
        let out = String::from_utf8(ex.into_inner().unwrap()).unwrap();
        let row = out.lines().nth(1).unwrap();
        assert!(row.starts_with("1,@user1,https://t.me/user1,Name 1,bio 1,,Poker Club,-100123,2,Yes,cpa traffic,"));
        assert!(row.ends_with("2024-05-01 12:02:00 UTC"));
    }

    #[test]
    fn profile_url_falls_back_to_deep_link() {
        assert_eq!(profile_url("@bob", "5"), "https://t.me/bob");
        assert_eq!(profile_url("", "5"), "tg://user?id=5");
        assert_eq!(profile_url("@", "5"), "tg://user?id=5");
        assert_eq!(profile_url("", ""), "");
    }
}

//! Process stage: export -> per-user aggregates -> keyword filter -> verdicts.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::{
    aggregate::{Aggregator, UserMap},
    artifacts::{
        artifact_path, read_json, write_json, FILTERED_PREFIX, LEADS_PREFIX, USERS_PREFIX,
        VALIDATED_PREFIX,
    },
    classifier::ClassifierClient,
    errors::Error,
    export::{LeadSheetExporter, RecordReader},
    filter::users_with_keywords,
    report::RunSummary,
    Result,
};

#[derive(Clone, Debug)]
pub struct ProcessSettings {
    pub data_folder: PathBuf,
    pub delimiter: u8,
}

#[derive(Debug, Default)]
pub struct ProcessOutcome {
    pub total_users: usize,
    pub filtered_users: usize,
    pub leads: usize,
    pub users_path: PathBuf,
    pub filtered_path: Option<PathBuf>,
    pub validated_path: Option<PathBuf>,
    pub leads_path: Option<PathBuf>,
    /// Export rows folded into aggregates (or skipped).
    pub records: RunSummary,
    /// Users sent to the classifier.
    pub classification: RunSummary,
}

/// Read a message export into per-user aggregates.
///
/// Rows that fail validation (no sender id, bad id or date) are skipped and
/// counted; read failures abort.
pub fn load_users(path: &Path, delimiter: u8) -> Result<(UserMap, RunSummary)> {
    let mut reader = RecordReader::open(path, delimiter)?;
    let mut agg = Aggregator::new();
    let mut summary = RunSummary::default();

    for (line, row) in reader.records().enumerate() {
        // Header is line 1.
        let subject = format!("row {}", line + 2);
        let pushed = row.and_then(|record| agg.push(&record));
        match pushed {
            Ok(()) => summary.processed += 1,
            Err(e @ Error::Validation(_)) => summary.record_failure(&subject, &e),
            Err(e) => return Err(e),
        }
    }

    Ok((agg.finish(), summary))
}

/// Classify every user sequentially. Verdicts are attached to a copy of each
/// aggregate; users whose classification fails are left out and counted.
pub async fn classify_users(client: &ClassifierClient, users: &UserMap) -> (UserMap, RunSummary) {
    let mut summary = RunSummary::default();
    let mut classified = UserMap::new();
    let total = users.len();

    for (i, user) in users.iter().enumerate() {
        match client.classify(user).await {
            Ok(result) => {
                summary.processed += 1;
                if !result.well_formed {
                    summary.malformed_verdicts += 1;
                }
                let mut user = user.clone();
                user.attach(&result);
                info!(
                    progress = %format!("{}/{total}", i + 1),
                    sender_id = %user.sender_id,
                    verdict = result.verdict,
                    "classified"
                );
                classified.insert(user);
            }
            Err(e) => summary.record_failure(&user.sender_id, &e),
        }
    }

    (classified, summary)
}

/// Run the process stage over one export.
///
/// Writes the users artifact, then the filtered artifact when at least one user
/// matched a keyword. With a classifier, also writes the validated artifact (all
/// classified users with their verdict) and the lead sheet (positive verdicts).
pub async fn process_export(
    input: &Path,
    classifier: Option<&ClassifierClient>,
    settings: &ProcessSettings,
) -> Result<ProcessOutcome> {
    info!(input = %input.display(), "processing export");
    let (users, records) = load_users(input, settings.delimiter)?;

    let title = users.iter().next().map(|u| u.group.clone()).unwrap_or_default();
    let dir = settings.data_folder.as_path();

    let users_path = artifact_path(dir, USERS_PREFIX, &title, "json");
    write_json(&users_path, &users)?;
    info!(
        users = users.len(),
        messages = users.message_count(),
        path = %users_path.display(),
        "users written"
    );

    let mut outcome = ProcessOutcome {
        total_users: users.len(),
        users_path,
        records,
        ..ProcessOutcome::default()
    };

    let filtered = users_with_keywords(&users);
    outcome.filtered_users = filtered.len();
    if filtered.is_empty() {
        info!("no users matched any keyword");
        return Ok(outcome);
    }

    let filtered_path = artifact_path(dir, FILTERED_PREFIX, &title, "json");
    write_json(&filtered_path, &filtered)?;
    info!(
        users = filtered.len(),
        path = %filtered_path.display(),
        "filtered users written"
    );
    outcome.filtered_path = Some(filtered_path);

    let Some(client) = classifier else {
        return Ok(outcome);
    };

    let (classified, summary) = classify_users(client, &filtered).await;
    outcome.classification = summary;

    let validated_path = artifact_path(dir, VALIDATED_PREFIX, &title, "json");
    write_json(&validated_path, &classified)?;
    outcome.validated_path = Some(validated_path);

    let leads_path = artifact_path(dir, LEADS_PREFIX, &title, "csv");
    outcome.leads = write_lead_sheet(&leads_path, &classified, settings.delimiter)?;
    outcome.leads_path = Some(leads_path);

    Ok(outcome)
}

/// Write one lead sheet row per user with a positive verdict. Returns the row count.
pub fn write_lead_sheet(path: &Path, users: &UserMap, delimiter: u8) -> Result<usize> {
    let mut sheet = LeadSheetExporter::create(path, delimiter)?;
    for user in users.iter().filter(|u| u.validated == Some(true)) {
        sheet.write(user)?;
    }
    let leads = sheet.rows_written();
    sheet.into_inner()?;
    info!(
        leads,
        classified = users.len(),
        path = %path.display(),
        "lead sheet written"
    );
    Ok(leads)
}

/// Rebuild the lead sheet from a previously written validated-users artifact,
/// without calling the classifier again. Returns the sheet path and row count.
pub fn export_leads(validated: &Path, settings: &ProcessSettings) -> Result<(PathBuf, usize)> {
    let users: UserMap = read_json(validated)?;
    info!(
        input = %validated.display(),
        users = users.len(),
        "validated users loaded"
    );
    let title = users.iter().next().map(|u| u.group.clone()).unwrap_or_default();
    let path = artifact_path(&settings.data_folder, LEADS_PREFIX, &title, "csv");
    let leads = write_lead_sheet(&path, &users, settings.delimiter)?;
    Ok((path, leads))
}

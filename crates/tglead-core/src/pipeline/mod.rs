//! The two pipeline stages.
//!
//! `scrape` turns a group's history into the flat message export; `process`
//! turns an export into per-user artifacts and (optionally) classifier verdicts.

pub mod process;
pub mod scrape;

pub use process::{
    classify_users, export_leads, load_users, process_export, write_lead_sheet, ProcessOutcome,
    ProcessSettings,
};
pub use scrape::{Period, ScrapeMode, ScrapeOutcome, ScrapeSettings, Scraper, TimeWindow};

//! Process-wide client library variables.
//!
//! The remote client library reads its locale and text formats for dates,
//! timestamps and numbers from process-level variables. They are written once
//! per new locale key, before that locale's environment is created, and are
//! never rolled back.

use crate::connection::config::FormatSettings;
use lazy_static::lazy_static;
use std::collections::BTreeMap;
use std::sync::RwLock;

lazy_static! {
    static ref CLIENT_VARIABLES: RwLock<BTreeMap<String, String>> = RwLock::new(BTreeMap::new());
}

pub const NLS_LANG: &str = "NLS_LANG";
pub const NLS_DATE_FORMAT: &str = "NLS_DATE_FORMAT";
pub const NLS_TIMESTAMP_FORMAT: &str = "NLS_TIMESTAMP_FORMAT";
pub const NLS_TIMESTAMP_TZ_FORMAT: &str = "NLS_TIMESTAMP_TZ_FORMAT";
pub const NLS_NUMERIC_CHARACTERS: &str = "NLS_NUMERIC_CHARACTERS";
pub const NLS_CALENDAR: &str = "NLS_CALENDAR";
pub const NLS_DATE_LANGUAGE: &str = "NLS_DATE_LANGUAGE";

/// Publish the variables for `locale`
pub fn apply(locale: &str, format: &FormatSettings) {
    let mut vars = CLIENT_VARIABLES
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());

    vars.insert(NLS_LANG.to_string(), locale.to_string());
    vars.insert(NLS_DATE_FORMAT.to_string(), format.date_format.clone());
    vars.insert(NLS_TIMESTAMP_FORMAT.to_string(), format.timestamp_format.clone());
    vars.insert(NLS_TIMESTAMP_TZ_FORMAT.to_string(), format.timestamp_tz_format.clone());
    vars.insert(NLS_NUMERIC_CHARACTERS.to_string(), format.numeric_characters.clone());
    vars.insert(NLS_CALENDAR.to_string(), format.calendar.clone());
    vars.insert(NLS_DATE_LANGUAGE.to_string(), format.date_language.clone());
}

pub fn get(name: &str) -> Option<String> {
    CLIENT_VARIABLES
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .get(name)
        .cloned()
}

pub fn snapshot() -> BTreeMap<String, String> {
    CLIENT_VARIABLES
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .clone()
}

use crate::error::OrmError;
use crate::value::FieldValue;
use crate::{debug, info};
use config::{Config, Environment, File};
use dotenv::dotenv;
use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Settings file read by [`Settings::load`], relative to the working directory.
pub const DEFAULT_SETTINGS_PATH: &str = "config/settings";
/// Env vars named `HYDRANT__<KEY>` (or `HYDRANT__SERIALIZATION__<KEY>`) override the file.
pub const ENV_PREFIX: &str = "HYDRANT";

static DOTENV_PRESENT: Lazy<bool> = Lazy::new(|| dotenv().is_ok());

/// Layers `defaults`, the optional file at `path` and `PREFIX__KEY` env vars, later sources winning.
pub fn load_config<T>(defaults: &T, path: &str, prefix: &str) -> Result<T, OrmError>
where
    T: Serialize + DeserializeOwned + Debug,
{
    let with_dotenv = *DOTENV_PRESENT;
    let settings = Config::builder()
        .add_source(Config::try_from(defaults)?)
        .add_source(File::with_name(path).required(false))
        .add_source(Environment::with_prefix(prefix).try_parsing(true).separator("__"))
        .build()?
        .try_deserialize::<T>()?;
    info!("Hydrant settings read from '{}' ({} .env)", path, if with_dotenv { "with" } else { "without" });
    debug!("{:#?}", settings);
    Ok(settings)
}

/// How a date string without an explicit offset is interpreted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TimezoneRule {
    /// Interpret in the process-local timezone.
    Local,
    /// Append this offset (e.g. `+02:00`) before parsing.
    Offset(String),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SerializationSettings {
    pub force_object: bool,
}

impl Default for SerializationSettings {
    fn default() -> Self {
        SerializationSettings { force_object: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    /// Hydrate `null` as an explicit unset marker instead of `null`.
    pub force_undefined: bool,
    pub force_utc_timezone: bool,
    /// Offset string such as `+02:00`, or `local`.
    pub timezone: Option<String>,
    pub serialization: SerializationSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            force_undefined: false,
            force_utc_timezone: false,
            timezone: None,
            serialization: SerializationSettings::default(),
        }
    }
}

impl Settings {
    /// Defaults overridden by the settings file at `path` and `HYDRANT__*` env vars.
    pub fn new(path: &str) -> Result<Self, OrmError> {
        load_config(&Settings::default(), path, ENV_PREFIX)
    }

    pub fn load() -> Result<Self, OrmError> {
        Settings::new(DEFAULT_SETTINGS_PATH)
    }

    pub fn with_timezone(mut self, offset: &str) -> Self {
        self.timezone = Some(offset.to_string());
        self
    }

    pub fn with_force_undefined(mut self, force_undefined: bool) -> Self {
        self.force_undefined = force_undefined;
        self
    }

    pub fn with_force_object(mut self, force_object: bool) -> Self {
        self.serialization.force_object = force_object;
        self
    }

    pub fn timezone_rule(&self) -> TimezoneRule {
        if self.force_utc_timezone {
            return TimezoneRule::Offset("+00:00".to_string());
        }
        match self.timezone.as_deref() {
            None => TimezoneRule::Local,
            Some(tz) if tz.eq_ignore_ascii_case("local") => TimezoneRule::Local,
            Some("Z") => TimezoneRule::Offset("+00:00".to_string()),
            Some(tz) => TimezoneRule::Offset(tz.to_string()),
        }
    }

    pub fn null_value(&self) -> FieldValue {
        null_sentinel(self.force_undefined)
    }
}

pub(crate) fn null_sentinel(force_undefined: bool) -> FieldValue {
    if force_undefined {
        FieldValue::Undefined
    } else {
        FieldValue::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn force_utc_overrides_configured_offset() {
        let mut settings = Settings::default().with_timezone("+02:00");
        assert_eq!(settings.timezone_rule(), TimezoneRule::Offset("+02:00".into()));
        settings.force_utc_timezone = true;
        assert_eq!(settings.timezone_rule(), TimezoneRule::Offset("+00:00".into()));
    }

    #[test]
    fn missing_or_local_timezone_is_local() {
        assert_eq!(Settings::default().timezone_rule(), TimezoneRule::Local);
        assert_eq!(Settings::default().with_timezone("LOCAL").timezone_rule(), TimezoneRule::Local);
    }

    #[test]
    fn null_sentinel_follows_force_undefined() {
        assert!(Settings::default().null_value().is_null());
        assert!(Settings::default().with_force_undefined(true).null_value().is_undefined());
    }

    #[test]
    fn settings_deserialize_with_defaults() {
        let settings: Settings = serde_json::from_value(serde_json::json!({
            "timezone": "+01:00",
            "serialization": { "force_object": true }
        })).unwrap();
        assert!(!settings.force_undefined);
        assert_eq!(settings.timezone.as_deref(), Some("+01:00"));
        assert!(settings.serialization.force_object);
    }

    #[test]
    fn settings_load_from_config_file() {
        let settings = Settings::load().unwrap();
        assert_eq!(settings.timezone.as_deref(), Some("local"));
        assert_eq!(settings.timezone_rule(), TimezoneRule::Local);
        assert!(!settings.serialization.force_object);
    }

    #[test]
    fn missing_settings_file_falls_back_to_defaults() {
        let settings = Settings::new("config/absent").unwrap();
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn load_config_layers_the_file_over_given_defaults() {
        let defaults = Settings::default().with_timezone("+05:00").with_force_object(true);
        let settings = load_config(&defaults, DEFAULT_SETTINGS_PATH, ENV_PREFIX).unwrap();
        assert_eq!(settings.timezone.as_deref(), Some("local"));
        assert!(!settings.serialization.force_object);
        let untouched = load_config(&defaults, "config/absent", ENV_PREFIX).unwrap();
        assert_eq!(untouched, defaults);
    }
}

//! Bonus settings and the registry that keeps exactly one of them active.

use std::env;

use thiserror::Error;
use tracing::warn;

use crate::Amount;
use crate::amount::ParseAmountError;
use crate::model::{MAX_CAPACITY, Rank};

/// Errors raised while building or publishing settings.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{key}: {source}")]
    Amount {
        key: &'static str,
        source: ParseAmountError,
    },

    #[error("{key}: '{value}' is not a valid integer")]
    Integer { key: &'static str, value: String },

    #[error("{0} must not be negative")]
    NegativeAmount(&'static str),

    #[error("capacity must be between 1 and 3, got {0}")]
    Capacity(usize),

    #[error("{0} must be at least 1")]
    Zero(&'static str),

    #[error("settings record {0} does not exist")]
    UnknownRecord(SettingsId),
}

/// Amounts and limits read by every placement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BonusSettings {
    /// Minimum payment accepted for a placement.
    pub registration_fee: Amount,
    pub first_slot: Amount,
    pub second_slot: Amount,
    pub spillover: Amount,
    pub third_slot_spillover: Amount,
    /// Children allowed per node, at most [`MAX_CAPACITY`].
    pub capacity: usize,
    /// First-line partners needed per rank step.
    pub partners_per_rank: usize,
    pub max_rank: Rank,
    /// Attempts per unit of work before a commit conflict is surfaced.
    pub max_retries: u32,
}

/// Built-in values applied when no record is active.
impl Default for BonusSettings {
    fn default() -> Self {
        Self {
            registration_fee: Amount::units(100),
            first_slot: Amount::units(100),
            second_slot: Amount::units(50),
            spillover: Amount::units(50),
            third_slot_spillover: Amount::units(100),
            capacity: MAX_CAPACITY,
            partners_per_rank: 3,
            max_rank: 10,
            max_retries: 3,
        }
    }
}

impl BonusSettings {
    const PREFIX: &'static str = "MLM_";

    /// Build settings from `MLM_*` environment variables, loading `.env` first.
    ///
    /// Returns `Ok(None)` when no `MLM_*` variable is set at all.
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup; unset keys keep their default.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Option<Self>, ConfigError> {
        let mut found = false;
        let mut get = |key: &str| {
            let value = lookup(&format!("{}{key}", Self::PREFIX));
            found |= value.is_some();
            value
        };

        let mut settings = Self::default();
        if let Some(v) = get("REGISTRATION_FEE") {
            settings.registration_fee = parse_amount("registration_fee", &v)?;
        }
        if let Some(v) = get("FIRST_SLOT_BONUS") {
            settings.first_slot = parse_amount("first_slot", &v)?;
        }
        if let Some(v) = get("SECOND_SLOT_BONUS") {
            settings.second_slot = parse_amount("second_slot", &v)?;
        }
        if let Some(v) = get("SPILLOVER_BONUS") {
            settings.spillover = parse_amount("spillover", &v)?;
        }
        if let Some(v) = get("THIRD_SLOT_SPILLOVER_BONUS") {
            settings.third_slot_spillover = parse_amount("third_slot_spillover", &v)?;
        }
        if let Some(v) = get("CAPACITY") {
            settings.capacity = parse_int("capacity", &v)?;
        }
        if let Some(v) = get("PARTNERS_PER_RANK") {
            settings.partners_per_rank = parse_int("partners_per_rank", &v)?;
        }
        if let Some(v) = get("MAX_RANK") {
            settings.max_rank = parse_int("max_rank", &v)?;
        }
        if let Some(v) = get("MAX_RETRIES") {
            settings.max_retries = parse_int("max_retries", &v)?;
        }

        if !found {
            return Ok(None);
        }
        settings.validate()?;
        Ok(Some(settings))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let amounts = [
            ("registration_fee", self.registration_fee),
            ("first_slot", self.first_slot),
            ("second_slot", self.second_slot),
            ("spillover", self.spillover),
            ("third_slot_spillover", self.third_slot_spillover),
        ];
        if let Some((key, _)) = amounts.iter().find(|(_, amount)| amount.is_negative()) {
            return Err(ConfigError::NegativeAmount(*key));
        }
        if !(1..=MAX_CAPACITY).contains(&self.capacity) {
            return Err(ConfigError::Capacity(self.capacity));
        }
        if self.partners_per_rank == 0 {
            return Err(ConfigError::Zero("partners_per_rank"));
        }
        if self.max_retries == 0 {
            return Err(ConfigError::Zero("max_retries"));
        }
        Ok(())
    }
}

fn parse_amount(key: &'static str, value: &str) -> Result<Amount, ConfigError> {
    value
        .parse()
        .map_err(|source| ConfigError::Amount { key, source })
}

fn parse_int<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::Integer {
        key,
        value: value.to_string(),
    })
}

/// Settings record identifier.
pub type SettingsId = u32;

#[derive(Debug, Clone)]
struct SettingsRecord {
    id: SettingsId,
    settings: BonusSettings,
    active: bool,
}

/// Published settings records; at most one is active at a time.
#[derive(Debug, Clone, Default)]
pub struct SettingsRegistry {
    records: Vec<SettingsRecord>,
}

impl SettingsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in defaults published and active.
    pub fn with_defaults() -> Self {
        Self {
            records: vec![SettingsRecord {
                id: 1,
                settings: BonusSettings::default(),
                active: true,
            }],
        }
    }

    /// Registry holding `settings` as its single active record.
    pub fn with_active(settings: BonusSettings) -> Result<Self, ConfigError> {
        let mut registry = Self::new();
        registry.publish(settings)?;
        Ok(registry)
    }

    /// Validate and store a new record, making it the active one.
    pub fn publish(&mut self, settings: BonusSettings) -> Result<SettingsId, ConfigError> {
        settings.validate()?;
        let id = self.records.len() as SettingsId + 1;
        self.records.iter_mut().for_each(|r| r.active = false);
        self.records.push(SettingsRecord {
            id,
            settings,
            active: true,
        });
        Ok(id)
    }

    /// Switch the active record to an earlier published one.
    pub fn activate(&mut self, id: SettingsId) -> Result<(), ConfigError> {
        if !self.records.iter().any(|r| r.id == id) {
            return Err(ConfigError::UnknownRecord(id));
        }
        for record in &mut self.records {
            record.active = record.id == id;
        }
        Ok(())
    }

    /// Leave no record active; placements fall back to the built-in defaults.
    pub fn deactivate_all(&mut self) {
        self.records.iter_mut().for_each(|r| r.active = false);
    }

    pub fn active(&self) -> Option<&BonusSettings> {
        self.records.iter().find(|r| r.active).map(|r| &r.settings)
    }

    /// Active settings, or the built-in defaults when none is active.
    pub fn active_or_default(&self) -> BonusSettings {
        match self.active() {
            Some(settings) => settings.clone(),
            None => {
                warn!("no active bonus settings, applying built-in defaults");
                BonusSettings::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_are_valid() {
        let settings = BonusSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.first_slot, Amount::units(100));
        assert_eq!(settings.second_slot, Amount::units(50));
        assert_eq!(settings.spillover, Amount::units(50));
        assert_eq!(settings.third_slot_spillover, Amount::units(100));
        assert_eq!(settings.capacity, 3);
    }

    #[test]
    fn lookup_without_keys_yields_none() {
        assert_eq!(BonusSettings::from_lookup(lookup(&[])), Ok(None));
    }

    #[test]
    fn lookup_overrides_only_given_keys() {
        let settings = BonusSettings::from_lookup(lookup(&[
            ("MLM_FIRST_SLOT_BONUS", "120.50"),
            ("MLM_CAPACITY", "2"),
        ]))
        .unwrap()
        .unwrap();

        assert_eq!(settings.first_slot, Amount::from_scaled(12_050));
        assert_eq!(settings.capacity, 2);
        assert_eq!(settings.second_slot, BonusSettings::default().second_slot);
    }

    #[test]
    fn lookup_rejects_bad_values() {
        let err = BonusSettings::from_lookup(lookup(&[("MLM_SPILLOVER_BONUS", "lots")]));
        assert!(matches!(
            err,
            Err(ConfigError::Amount {
                key: "spillover",
                ..
            })
        ));

        let err = BonusSettings::from_lookup(lookup(&[("MLM_MAX_RANK", "-1")]));
        assert!(matches!(err, Err(ConfigError::Integer { key: "max_rank", .. })));

        let err = BonusSettings::from_lookup(lookup(&[("MLM_CAPACITY", "4")]));
        assert_eq!(err, Err(ConfigError::Capacity(4)));
    }

    #[test]
    fn validate_rejects_negative_amounts() {
        let settings = BonusSettings {
            second_slot: Amount::units(-1),
            ..BonusSettings::default()
        };
        assert_eq!(
            settings.validate(),
            Err(ConfigError::NegativeAmount("second_slot"))
        );
    }

    #[test]
    fn publish_keeps_a_single_active_record() {
        let mut registry = SettingsRegistry::new();
        assert!(registry.active().is_none());

        let first = registry.publish(BonusSettings::default()).unwrap();
        let second = registry
            .publish(BonusSettings {
                first_slot: Amount::units(10),
                ..BonusSettings::default()
            })
            .unwrap();

        assert_eq!(registry.active().unwrap().first_slot, Amount::units(10));
        assert_eq!(registry.records.iter().filter(|r| r.active).count(), 1);

        registry.activate(first).unwrap();
        assert_eq!(registry.active().unwrap().first_slot, Amount::units(100));
        assert_eq!(registry.records.iter().filter(|r| r.active).count(), 1);
        assert_ne!(first, second);
    }

    #[test]
    fn activate_unknown_record_fails() {
        let mut registry = SettingsRegistry::new();
        assert_eq!(registry.activate(9), Err(ConfigError::UnknownRecord(9)));
    }

    #[test]
    fn publish_rejects_invalid_settings() {
        let mut registry = SettingsRegistry::new();
        let result = registry.publish(BonusSettings {
            capacity: 0,
            ..BonusSettings::default()
        });
        assert_eq!(result, Err(ConfigError::Capacity(0)));
        assert!(registry.active().is_none());
    }

    #[test]
    fn inactive_registry_falls_back_to_defaults() {
        let mut registry = SettingsRegistry::with_active(BonusSettings {
            first_slot: Amount::units(1),
            ..BonusSettings::default()
        })
        .unwrap();
        registry.deactivate_all();
        assert_eq!(registry.active_or_default(), BonusSettings::default());
    }
}

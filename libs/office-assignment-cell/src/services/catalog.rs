use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use shared_config::AppConfig;
use shared_models::OfficeCode;

use crate::services::rules::RuleSet;
use crate::{AssignmentError, Office, OfficeSize};

/// Offices in evaluation order. Catalog order is the final tie-break.
#[derive(Debug, Clone, PartialEq)]
pub struct OfficeCatalog {
    offices: Vec<Office>,
}

impl OfficeCatalog {
    pub fn from_offices(offices: Vec<Office>) -> Result<Self, AssignmentError> {
        let mut seen = HashSet::new();
        for office in &offices {
            if !office.code.is_resolved() {
                return Err(AssignmentError::Configuration(
                    "office catalog contains an unparseable office code".to_string(),
                ));
            }
            if !seen.insert(office.code.clone()) {
                return Err(AssignmentError::Configuration(format!(
                    "office {} is listed twice",
                    office.code
                )));
            }
        }
        Ok(Self { offices })
    }

    pub fn from_json(raw: &str) -> Result<Self, AssignmentError> {
        Self::from_offices(serde_json::from_str(raw)?)
    }

    pub fn load(path: &Path) -> Result<Self, AssignmentError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn builtin() -> Self {
        let room = |code: &str, size: OfficeSize, accessible: bool, ages: &[&str], features: &[&str]| Office {
            accessible,
            size,
            age_groups: ages.iter().map(|a| a.to_string()).collect(),
            features: features.iter().map(|f| f.to_string()).collect(),
            ..Office::new(OfficeCode::from(code))
        };

        Self {
            offices: vec![
                room("B-1", OfficeSize::Large, true, &["adult", "teen"], &["wheelchair-access", "group-seating"]),
                room("B-2", OfficeSize::Medium, true, &["child", "teen"], &["wheelchair-access", "play-therapy"]),
                room("B-3", OfficeSize::Medium, false, &["adult"], &[]),
                room("B-4", OfficeSize::Small, false, &["adult"], &["sound-masking"]),
                room("B-5", OfficeSize::Large, false, &["adult", "teen"], &["group-seating"]),
                room("C-1", OfficeSize::Small, false, &["teen", "adult"], &[]),
                room("C-2", OfficeSize::Medium, false, &["child"], &["play-therapy", "sand-tray"]),
                room("C-3", OfficeSize::Medium, false, &["adult"], &["sound-masking"]),
                room("A-v", OfficeSize::Medium, true, &[], &["telehealth"]),
            ],
        }
    }

    pub fn offices(&self) -> &[Office] {
        &self.offices
    }

    pub fn get(&self, code: &OfficeCode) -> Option<&Office> {
        self.offices.iter().find(|o| &o.code == code)
    }

    pub fn contains(&self, code: &OfficeCode) -> bool {
        self.get(code).is_some()
    }

    pub fn position(&self, code: &OfficeCode) -> Option<usize> {
        self.offices.iter().position(|o| &o.code == code)
    }

    /// Offices that can physically be double-booked.
    pub fn physical_offices(&self) -> impl Iterator<Item = &Office> {
        self.offices.iter().filter(|o| !o.is_virtual())
    }

    pub fn len(&self) -> usize {
        self.offices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.offices.is_empty()
    }
}

// ==============================================================================
// HOT-RELOADABLE SNAPSHOT
// ==============================================================================

/// Catalog and rules that were validated together.
#[derive(Debug, Clone)]
pub struct AssignmentSnapshot {
    pub catalog: OfficeCatalog,
    pub rules: RuleSet,
    pub loaded_at: DateTime<Utc>,
}

impl AssignmentSnapshot {
    pub fn builtin() -> Result<Self, AssignmentError> {
        let catalog = OfficeCatalog::builtin();
        let rules = RuleSet::builtin(&catalog)?;
        Ok(Self {
            catalog,
            rules,
            loaded_at: Utc::now(),
        })
    }

    /// Load from files, falling back to the built-in catalog or rules for any path not given.
    pub fn load(catalog_path: Option<&Path>, rules_path: Option<&Path>) -> Result<Self, AssignmentError> {
        let catalog = match catalog_path {
            Some(path) => OfficeCatalog::load(path)?,
            None => OfficeCatalog::builtin(),
        };
        let rules = match rules_path {
            Some(path) => RuleSet::load(path, &catalog)?,
            None => RuleSet::builtin(&catalog)?,
        };

        Ok(Self {
            catalog,
            rules,
            loaded_at: Utc::now(),
        })
    }
}

pub struct CatalogHandle {
    current: RwLock<Arc<AssignmentSnapshot>>,
    catalog_path: Option<PathBuf>,
    rules_path: Option<PathBuf>,
}

impl CatalogHandle {
    /// Loads eagerly so configuration errors surface at startup.
    pub fn new(config: &AppConfig) -> Result<Self, AssignmentError> {
        let catalog_path = config.office_catalog_path.as_ref().map(PathBuf::from);
        let rules_path = config.assignment_rules_path.as_ref().map(PathBuf::from);

        let snapshot = AssignmentSnapshot::load(catalog_path.as_deref(), rules_path.as_deref())?;
        info!(
            "Loaded {} offices and {} assignment rules",
            snapshot.catalog.len(),
            snapshot.rules.len()
        );

        Ok(Self {
            current: RwLock::new(Arc::new(snapshot)),
            catalog_path,
            rules_path,
        })
    }

    pub fn from_snapshot(snapshot: AssignmentSnapshot) -> Self {
        Self {
            current: RwLock::new(Arc::new(snapshot)),
            catalog_path: None,
            rules_path: None,
        }
    }

    pub async fn snapshot(&self) -> Arc<AssignmentSnapshot> {
        self.current.read().await.clone()
    }

    /// Re-read the configured files. A failed reload keeps the previous snapshot.
    pub async fn reload(&self) -> Result<(), AssignmentError> {
        if self.catalog_path.is_none() && self.rules_path.is_none() {
            debug!("No catalog or rules files configured; keeping built-in snapshot");
            return Ok(());
        }

        match AssignmentSnapshot::load(self.catalog_path.as_deref(), self.rules_path.as_deref()) {
            Ok(snapshot) => {
                info!(
                    "Reloaded office catalog ({} offices, {} rules)",
                    snapshot.catalog.len(),
                    snapshot.rules.len()
                );
                *self.current.write().await = Arc::new(snapshot);
                Ok(())
            }
            Err(e) => {
                warn!("Office catalog reload failed, keeping previous snapshot: {}", e);
                Err(e)
            }
        }
    }
}

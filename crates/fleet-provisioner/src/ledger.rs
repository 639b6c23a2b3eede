//! Provisioning ledger.
//!
//! Persisted per-site record of provisioning progress; the single source of
//! truth for resuming after an interruption.
//!
//! ## How it works
//!
//! 1. On startup the ledger file is loaded; a missing file is an empty ledger
//! 2. An unreadable or inconsistent file is [`ProvisionError::LedgerCorrupt`]
//!    and must stop the run
//! 3. Every mutation rewrites the whole file through a temporary file in the
//!    same directory followed by a rename, so readers never see a partial write
//! 4. The file is removed once the last record is removed

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::error::{ProvisionError, ProvisionResult};
use crate::inventory::{DeviceRole, Site};
use crate::phase::Phase;

/// A claimed device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Device serial
    pub serial: String,
    /// Role at the site
    pub role: DeviceRole,
}

/// Ledger entry for one site.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningRecord {
    /// Site number from the inventory
    pub site_number: String,
    /// Location from the inventory
    pub location: String,
    /// Network created for the site
    #[serde(default)]
    pub network_id: Option<String>,
    /// Devices claimed into the network
    #[serde(default)]
    pub devices: Option<Vec<DeviceEntry>>,
    /// Management VLAN recorded with the devices
    #[serde(default)]
    pub management_vlan: Option<u16>,
    /// Settings batch reached a non-failed terminal state
    #[serde(default)]
    pub settings_created: bool,
    /// Full error list of the last failed settings attempt
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub last_errors: Vec<String>,
    /// Time of the last persisted change
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProvisioningRecord {
    /// Creates the record written when a site's network is created.
    pub fn for_network(site: &Site, network_id: impl Into<String>) -> Self {
        Self {
            site_number: site.site_number.clone(),
            location: site.location.clone(),
            network_id: Some(network_id.into()),
            devices: None,
            management_vlan: None,
            settings_created: false,
            last_errors: Vec::new(),
            updated_at: Some(Utc::now()),
        }
    }

    /// Returns true once the Devices phase has been recorded.
    pub fn has_devices(&self) -> bool {
        self.devices.is_some()
    }

    /// Latest phase whose postcondition is recorded.
    pub fn completed_phase(&self) -> Option<Phase> {
        if self.settings_created {
            Some(Phase::Settings)
        } else if self.has_devices() {
            Some(Phase::Devices)
        } else if self.network_id.is_some() {
            Some(Phase::Networks)
        } else {
            None
        }
    }

    /// Serial recorded for a role.
    pub fn serial(&self, role: DeviceRole) -> Option<&str> {
        self.devices
            .as_ref()?
            .iter()
            .find(|d| d.role == role)
            .map(|d| d.serial.as_str())
    }

    /// Checks that no later-phase field is set without its prerequisites.
    fn check_consistency(&self) -> Result<(), String> {
        if self.has_devices() && self.network_id.is_none() {
            return Err(format!(
                "site {} has devices but no network_id",
                self.site_number
            ));
        }
        if self.settings_created && !self.has_devices() {
            return Err(format!(
                "site {} has settings_created without devices",
                self.site_number
            ));
        }
        Ok(())
    }
}

/// The ordered set of records plus the file they live in.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    records: Vec<ProvisioningRecord>,
}

impl Ledger {
    /// Loads the ledger, treating a missing file as empty.
    pub fn load(path: impl Into<PathBuf>) -> ProvisionResult<Self> {
        let path = path.into();

        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No ledger file, starting empty");
                return Ok(Self {
                    path,
                    records: Vec::new(),
                });
            }
            Err(e) => return Err(ProvisionError::LedgerIo { path, source: e }),
        };

        let records: Vec<ProvisioningRecord> =
            serde_json::from_str(&content).map_err(|e| ProvisionError::LedgerCorrupt {
                path: path.clone(),
                message: e.to_string(),
            })?;

        for record in &records {
            record
                .check_consistency()
                .map_err(|message| ProvisionError::LedgerCorrupt {
                    path: path.clone(),
                    message,
                })?;
        }

        info!(path = %path.display(), sites = records.len(), "Loaded provisioning ledger");
        Ok(Self { path, records })
    }

    /// Creates an empty, unsaved ledger.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            records: Vec::new(),
        }
    }

    /// Ledger file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records in site order.
    pub fn records(&self) -> &[ProvisioningRecord] {
        &self.records
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if no site has been recorded.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Record at `index`.
    pub fn get(&self, index: usize) -> Option<&ProvisioningRecord> {
        self.records.get(index)
    }

    /// Index of the record for a site number.
    pub fn position(&self, site_number: &str) -> Option<usize> {
        self.records
            .iter()
            .position(|r| r.site_number == site_number)
    }

    /// Record for a site number.
    pub fn find(&self, site_number: &str) -> Option<&ProvisioningRecord> {
        self.position(site_number).map(|i| &self.records[i])
    }

    /// Atomically writes the full ledger.
    pub fn save(&self) -> ProvisionResult<()> {
        write_atomic(&self.path, &self.records).map_err(|source| ProvisionError::LedgerIo {
            path: self.path.clone(),
            source,
        })
    }

    /// Replaces every record and persists.
    pub fn replace_all(&mut self, records: Vec<ProvisioningRecord>) -> ProvisionResult<()> {
        let previous = std::mem::replace(&mut self.records, records);
        if let Err(e) = self.save() {
            self.records = previous;
            return Err(e);
        }
        Ok(())
    }

    /// Applies `mutator` to one record and persists before returning.
    ///
    /// If persisting fails the in-memory record is left unchanged.
    pub fn update_site<F>(&mut self, index: usize, mutator: F) -> ProvisionResult<&ProvisioningRecord>
    where
        F: FnOnce(&mut ProvisioningRecord),
    {
        let mut updated = self.records.get(index).cloned().ok_or_else(|| {
            ProvisionError::invalid_site(index.to_string(), "no ledger record at this index")
        })?;
        mutator(&mut updated);
        updated.updated_at = Some(Utc::now());

        let previous = std::mem::replace(&mut self.records[index], updated);
        if let Err(e) = self.save() {
            self.records[index] = previous;
            return Err(e);
        }
        Ok(&self.records[index])
    }

    /// Removes one record and persists; deletes the file once empty.
    pub fn remove_site(&mut self, index: usize) -> ProvisionResult<ProvisioningRecord> {
        if index >= self.records.len() {
            return Err(ProvisionError::invalid_site(
                index.to_string(),
                "no ledger record at this index",
            ));
        }

        let removed = self.records.remove(index);
        let persisted = if self.records.is_empty() {
            self.remove_file()
        } else {
            self.save()
        };
        if let Err(e) = persisted {
            self.records.insert(index, removed);
            return Err(e);
        }
        Ok(removed)
    }

    /// Deletes the ledger file if present.
    pub fn remove_file(&self) -> ProvisionResult<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                info!(path = %self.path.display(), "Removed provisioning ledger");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(ProvisionError::LedgerIo {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Serializes `records` to a temp file beside `path` and renames it over `path`.
fn write_atomic(path: &Path, records: &[ProvisioningRecord]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let json = serde_json::to_vec_pretty(records).map_err(io::Error::other)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

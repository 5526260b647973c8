// User directory: identities, permission tiers, and pre-assigned entities.
//
// Loaded once at startup from a text file and read-only afterwards:
//
//   # comment
//   [Administrator]
//   admin
//   [Simulation_Admin]
//   sim1
//   [Normal_User]
//   alice:{AC1,AC2},{GV1}
//   bob
//
// A section header may appear anywhere on its line. Body lines are a bare id
// or `id:{aircraft,...},{ground vehicles,...}`; spaces are ignored and the
// ground-vehicle group may be omitted. Lines before the first header are
// ignored. The built-in `localhost_admin` administrator always exists.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

use airspace_protocol::PermissionTier;
use tracing::warn;

use crate::error::ConfigError;

/// Built-in administrator used for same-host trust and embedded mode.
pub const LOCALHOST_ADMIN: &str = "localhost_admin";

/// Identities a session may hold and still log in as someone else.
pub const DEFAULT_IDENTITIES: [&str; 2] = [LOCALHOST_ADMIN, "admin"];

pub fn is_default_identity(auth_id: &str) -> bool {
    DEFAULT_IDENTITIES.contains(&auth_id)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub auth_id: String,
    pub tier: PermissionTier,
    pub aircraft: BTreeSet<String>,
    pub ground_vehicles: BTreeSet<String>,
}

impl UserRecord {
    fn new(auth_id: &str, tier: PermissionTier) -> Self {
        Self {
            auth_id: auth_id.to_string(),
            tier,
            aircraft: BTreeSet::new(),
            ground_vehicles: BTreeSet::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserDirectory {
    users: BTreeMap<String, UserRecord>,
}

impl Default for UserDirectory {
    fn default() -> Self {
        let mut users = BTreeMap::new();
        users.insert(
            LOCALHOST_ADMIN.to_string(),
            UserRecord::new(LOCALHOST_ADMIN, PermissionTier::Administrator),
        );
        Self { users }
    }
}

impl UserDirectory {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::parse(&text))
    }

    pub fn parse(text: &str) -> Self {
        let mut dir = Self::default();
        let mut section: Option<PermissionTier> = None;

        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if line.contains("[Administrator]") {
                section = Some(PermissionTier::Administrator);
                continue;
            }
            if line.contains("[Simulation_Admin]") {
                section = Some(PermissionTier::SimulationAdmin);
                continue;
            }
            if line.contains("[Normal_User]") {
                section = Some(PermissionTier::NormalUser);
                continue;
            }
            if line.contains('[') || line.contains(']') {
                warn!(line = lineno + 1, "unrecognized section header in user file");
                section = None;
                continue;
            }
            let Some(tier) = section else {
                continue;
            };
            match parse_entry(line, tier) {
                Some(record) => {
                    dir.users.insert(record.auth_id.clone(), record);
                }
                None => warn!(line = lineno + 1, "malformed user entry ignored"),
            }
        }
        dir
    }

    pub fn get(&self, auth_id: &str) -> Option<&UserRecord> {
        self.users.get(auth_id)
    }

    pub fn tier_of(&self, auth_id: &str) -> Option<PermissionTier> {
        self.users.get(auth_id).map(|u| u.tier)
    }

    pub fn iter(&self) -> impl Iterator<Item = &UserRecord> {
        self.users.values()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

fn parse_entry(line: &str, tier: PermissionTier) -> Option<UserRecord> {
    let compact: String = line.chars().filter(|c| !c.is_whitespace()).collect();
    let Some((auth_id, groups)) = compact.split_once(':') else {
        return Some(UserRecord::new(&compact, tier));
    };
    if auth_id.is_empty() {
        return None;
    }
    let mut record = UserRecord::new(auth_id, tier);
    let (aircraft, ground_vehicles) = match groups.split_once("},{") {
        Some((ac, gv)) => (ac, gv),
        None => (groups, ""),
    };
    record.aircraft = id_list(aircraft);
    record.ground_vehicles = id_list(ground_vehicles);
    Some(record)
}

fn id_list(group: &str) -> BTreeSet<String> {
    group
        .trim_matches(|c| c == '{' || c == '}')
        .split(',')
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
stray_before_header
# Administrators
[Administrator]
admin

  [Simulation_Admin]
sim1
[Normal_User]
alice : { AC1, AC2 }, { GV1 }
bob:{AC3}
carol
";

    #[test]
    fn parses_tiers_and_assignments() {
        let dir = UserDirectory::parse(SAMPLE);
        assert_eq!(dir.tier_of("admin"), Some(PermissionTier::Administrator));
        assert_eq!(dir.tier_of("sim1"), Some(PermissionTier::SimulationAdmin));
        assert_eq!(dir.tier_of("carol"), Some(PermissionTier::NormalUser));

        let alice = dir.get("alice").unwrap();
        assert_eq!(alice.tier, PermissionTier::NormalUser);
        assert_eq!(
            alice.aircraft.iter().collect::<Vec<_>>(),
            vec!["AC1", "AC2"]
        );
        assert_eq!(
            alice.ground_vehicles.iter().collect::<Vec<_>>(),
            vec!["GV1"]
        );

        let bob = dir.get("bob").unwrap();
        assert_eq!(bob.aircraft.len(), 1);
        assert!(bob.ground_vehicles.is_empty());
    }

    #[test]
    fn lines_before_first_header_are_ignored() {
        let dir = UserDirectory::parse(SAMPLE);
        assert!(dir.get("stray_before_header").is_none());
    }

    #[test]
    fn localhost_admin_always_present() {
        let dir = UserDirectory::parse("");
        assert_eq!(
            dir.tier_of(LOCALHOST_ADMIN),
            Some(PermissionTier::Administrator)
        );
        assert!(is_default_identity("admin"));
        assert!(!is_default_identity("alice"));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("user.conf");
        fs::write(&path, SAMPLE).unwrap();
        let users = UserDirectory::load(&path).unwrap();
        assert_eq!(users.len(), 6);
    }
}

use super::{JobId, CATALOG};
use crate::model::JobParams;
use std::collections::BTreeMap;

/// Named job combinations. Applying one replaces the whole selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum Preset {
    /// Leave the current selection untouched
    Custom,
    /// Every test
    Full,
    /// System, CPU, memory, disk, speed
    Minimal,
    /// Minimal plus cross-border unlock and three-network route
    Lite,
    /// Minimal plus upstream and three-network route
    NetworkLite,
    /// Minimal plus common and cross-border streaming unlock
    UnlockLite,
    /// IP quality, speed, routes and ping
    Network,
    /// Streaming unlock only
    Unlock,
    /// System, CPU, memory, disk (fio)
    Hardware,
    /// IP quality and mail ports
    IpQuality,
}

const HARDWARE: [JobId; 4] = [JobId::Basic, JobId::Cpu, JobId::Memory, JobId::Disk];

impl Preset {
    /// Jobs enabled by the preset, or `None` for [`Preset::Custom`].
    pub fn members(self) -> Option<Vec<JobId>> {
        use JobId::*;
        let with_hardware = |extra: &[JobId]| -> Vec<JobId> {
            HARDWARE.iter().chain(extra).copied().collect()
        };
        let members = match self {
            Preset::Custom => return None,
            Preset::Full => JobId::all().collect(),
            Preset::Minimal => with_hardware(&[Speed]),
            Preset::Lite => with_hardware(&[Unlock, Nt3, Speed]),
            Preset::NetworkLite => with_hardware(&[Backtrace, Nt3, Speed]),
            Preset::UnlockLite => with_hardware(&[Comm, Unlock, Speed]),
            Preset::Network => vec![Security, Speed, Backtrace, Nt3, Ping],
            Preset::Unlock => vec![Comm, Unlock],
            Preset::Hardware => HARDWARE.to_vec(),
            Preset::IpQuality => vec![Security, Email],
        };
        Some(members)
    }
}

/// Mutable enable flags for every catalog entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    enabled: BTreeMap<JobId, bool>,
}

impl Default for Selection {
    fn default() -> Self {
        Self {
            enabled: CATALOG.iter().map(|s| (s.id, s.default_enabled)).collect(),
        }
    }
}

impl Selection {
    pub fn none() -> Self {
        let mut s = Self::default();
        s.set_all(false);
        s
    }

    pub fn set(&mut self, id: JobId, on: bool) {
        self.enabled.insert(id, on);
    }

    pub fn set_all(&mut self, on: bool) {
        for flag in self.enabled.values_mut() {
            *flag = on;
        }
    }

    pub fn is_enabled(&self, id: JobId) -> bool {
        self.enabled.get(&id).copied().unwrap_or(false)
    }

    /// Select-none then select the preset's members, so the result does not
    /// depend on the prior selection. Returns false for [`Preset::Custom`].
    pub fn apply_preset(&mut self, preset: Preset, params: &mut JobParams) -> bool {
        let Some(members) = preset.members() else {
            return false;
        };
        self.set_all(false);
        for id in members {
            self.set(id, true);
        }
        if preset == Preset::Hardware {
            params.disk_method = "fio".into();
        }
        true
    }

    /// Freeze the enabled jobs, in catalog order, for one run.
    pub fn snapshot(&self) -> SelectionSet {
        SelectionSet(JobId::all().filter(|id| self.is_enabled(*id)).collect())
    }
}

/// Immutable, ordered snapshot of the jobs enabled when a run starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionSet(Vec<JobId>);

impl SelectionSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, id: JobId) -> bool {
        self.0.contains(&id)
    }

    pub fn ids(&self) -> &[JobId] {
        &self.0
    }
}

impl FromIterator<JobId> for SelectionSet {
    fn from_iter<I: IntoIterator<Item = JobId>>(iter: I) -> Self {
        let mut sel = Selection::none();
        for id in iter {
            sel.set(id, true);
        }
        sel.snapshot()
    }
}

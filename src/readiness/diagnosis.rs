//! Failure diagnosis for devices that did not show progress

use crate::device::DeviceId;
use std::fmt;

/// Why a device is (or is not) showing progress
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Diagnosis {
    /// The progress counter is readable
    ProgressVisible,
    /// The test application is in front but its counter could not be read
    TestAppStalled,
    /// The system booted to its launcher but the test application is absent
    TestAppAbsent { foreground: String },
    /// The device never booted far enough to reach the launcher
    NotBooted { foreground: Option<String> },
}

impl Diagnosis {
    /// Classify a device by the package owning its foreground window
    pub fn from_foreground(
        foreground: Option<String>,
        launcher_package: &str,
        test_app_package: &str,
    ) -> Self {
        match foreground {
            Some(package) if package == test_app_package => Diagnosis::TestAppStalled,
            Some(package) if package == launcher_package => {
                Diagnosis::TestAppAbsent {
                    foreground: package,
                }
            }
            other => Diagnosis::NotBooted { foreground: other },
        }
    }
}

impl fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnosis::ProgressVisible => write!(f, "Pass"),
            Diagnosis::TestAppStalled => write!(f, "Test_software_no_progress"),
            Diagnosis::TestAppAbsent { .. } => write!(f, "Test_software_startup_failed"),
            Diagnosis::NotBooted { .. } => write!(f, "System_startup_failed"),
        }
    }
}

/// Per-device diagnoses from one capture pass
#[derive(Debug, Clone, Default)]
pub struct DiagnosticReport {
    entries: Vec<(DeviceId, Diagnosis)>,
}

impl DiagnosticReport {
    pub fn push(&mut self, id: DeviceId, diagnosis: Diagnosis) {
        self.entries.push((id, diagnosis));
    }

    #[cfg(test)]
    pub fn get(&self, id: &DeviceId) -> Option<&Diagnosis> {
        self.entries
            .iter()
            .find(|(entry, _)| entry == id)
            .map(|(_, diagnosis)| diagnosis)
    }

    /// Whether any device failed to boot at all
    pub fn any_not_booted(&self) -> bool {
        self.entries
            .iter()
            .any(|(_, d)| matches!(d, Diagnosis::NotBooted { .. }))
    }

    /// Whether any device booted without starting the test application
    pub fn any_test_app_absent(&self) -> bool {
        self.entries
            .iter()
            .any(|(_, d)| matches!(d, Diagnosis::TestAppAbsent { .. }))
    }

    /// One-line summary listing every device that is not progressing
    pub fn summary(&self) -> String {
        let failures: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, d)| *d != Diagnosis::ProgressVisible)
            .map(|(id, d)| format!("{}={}", id, d))
            .collect();

        if failures.is_empty() {
            "Pass".into()
        } else {
            failures.join(", ")
        }
    }
}

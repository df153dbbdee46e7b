// # Traffic Export Scopes
//
// The outbound traffic export is scoped by three files derived from the
// label and managed-workload exports:
//
// - `href_labels.wkld.m.csv`: hrefs of the app labels carried by managed
//   workloads, minus the excluded label prefixes (traffic sources)
// - `href_labels.app.csv`: hrefs of every `app` label (excluded destinations)
// - `service.exlude.csv`: services left out of the export (ICMP, ICMPv6)

use crate::csv_io::{Label, read_labels, read_workload_apps};
use dna_core::Result;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Source label hrefs file
pub const MANAGED_APP_HREFS: &str = "href_labels.wkld.m.csv";

/// Destination label hrefs file
pub const ALL_APP_HREFS: &str = "href_labels.app.csv";

/// Service exclusion file
pub const SERVICE_EXCLUSIONS: &str = "service.exlude.csv";

/// ICMP (protocol 1) and ICMPv6 (protocol 58), any port
pub const SERVICE_EXCLUSIONS_CONTENT: &str = "PortNumber,NumericIANA\n0,1\n0,58\n";

/// Label hrefs scoping the traffic export
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelScopes {
    /// App labels used by managed workloads
    pub managed_apps: BTreeSet<String>,
    /// Every app label
    pub all_apps: BTreeSet<String>,
}

/// Paths of the written scope files
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScopeFiles {
    /// Hrefs of the managed workloads' app labels
    pub managed_apps: PathBuf,
    /// Hrefs of every app label
    pub all_apps: PathBuf,
    /// Services left out of the traffic export
    pub services: PathBuf,
}

impl LabelScopes {
    /// Derive scopes from label and workload rows
    pub fn derive(labels: &[Label], workload_apps: &[String], excluded_prefixes: &[String]) -> Self {
        let href_by_value: HashMap<&str, &str> = labels
            .iter()
            .filter(|label| label.key.eq_ignore_ascii_case("app"))
            .map(|label| (label.value.as_str(), label.href.as_str()))
            .collect();

        let mut managed_apps = BTreeSet::new();
        for app in workload_apps {
            if excluded_prefixes.iter().any(|prefix| app.starts_with(prefix.as_str())) {
                debug!("Excluding app label {}", app);
                continue;
            }
            match href_by_value.get(app.as_str()) {
                Some(href) => {
                    managed_apps.insert(href.to_string());
                }
                None => warn!("App label {} of a managed workload is not in the label export", app),
            }
        }

        Self {
            managed_apps,
            all_apps: href_by_value.values().map(|href| href.to_string()).collect(),
        }
    }

    /// Derive scopes from the export files
    pub fn from_exports(labels: &Path, workloads: &Path, excluded_prefixes: &[String]) -> Result<Self> {
        Ok(Self::derive(
            &read_labels(labels)?,
            &read_workload_apps(workloads)?,
            excluded_prefixes,
        ))
    }

    /// Write the three scope files into `dir`
    pub async fn write(&self, dir: &Path) -> Result<ScopeFiles> {
        let files = ScopeFiles {
            managed_apps: dir.join(MANAGED_APP_HREFS),
            all_apps: dir.join(ALL_APP_HREFS),
            services: dir.join(SERVICE_EXCLUSIONS),
        };

        tokio::fs::write(&files.managed_apps, lines(&self.managed_apps)).await?;
        tokio::fs::write(&files.all_apps, lines(&self.all_apps)).await?;
        tokio::fs::write(&files.services, SERVICE_EXCLUSIONS_CONTENT).await?;

        debug!(
            "Traffic scope: {} managed app label(s), {} app label(s)",
            self.managed_apps.len(),
            self.all_apps.len()
        );
        Ok(files)
    }
}

/// One href per line, newline-terminated when non-empty
fn lines(hrefs: &BTreeSet<String>) -> String {
    hrefs.iter().map(|href| format!("{}\n", href)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(key: &str, value: &str, href: &str) -> Label {
        Label {
            key: key.to_string(),
            value: value.to_string(),
            href: href.to_string(),
        }
    }

    #[test]
    fn test_derive_scopes() {
        let labels = vec![
            label("app", "billing", "/labels/1"),
            label("app", "tmp-sandbox", "/labels/2"),
            label("app", "unused", "/labels/3"),
            label("env", "prod", "/labels/4"),
        ];
        let apps = vec!["billing".to_string(), "tmp-sandbox".to_string(), "ghost".to_string()];

        let scopes = LabelScopes::derive(&labels, &apps, &["tmp-".to_string()]);
        assert_eq!(scopes.managed_apps, BTreeSet::from(["/labels/1".to_string()]));
        assert_eq!(scopes.all_apps.len(), 3);
        assert!(!scopes.all_apps.contains("/labels/4"));
    }

    #[tokio::test]
    async fn test_write_scope_files() {
        let dir = tempfile::tempdir().unwrap();
        let scopes = LabelScopes {
            managed_apps: BTreeSet::new(),
            all_apps: BTreeSet::from(["/labels/1".to_string(), "/labels/2".to_string()]),
        };

        let files = scopes.write(dir.path()).await.unwrap();
        assert_eq!(std::fs::read_to_string(&files.managed_apps).unwrap(), "");
        assert_eq!(std::fs::read_to_string(&files.all_apps).unwrap(), "/labels/1\n/labels/2\n");
        assert_eq!(
            std::fs::read_to_string(&files.services).unwrap(),
            "PortNumber,NumericIANA\n0,1\n0,58\n"
        );
    }
}

// # Workloader Adapter
//
// This crate connects the reconciliation engine to the policy compute engine
// through the `workloader` command-line tool.
//
// ## Purpose
//
// Implements both collaborator seams of `dna-core` on top of CSV exports and
// imports:
// - **AddressListStore**: `workloader_ipl_export.sh`, `workloader_ipl_import.sh`,
//   `workloader_ipl_delete.sh`
// - **TrafficSource**: `workloader_wkld_m_export.sh`, `workloader_label_export.sh`,
//   `workloader_traffic_out.sh`, `workloader_traffic_iplist.sh`
//
// Every export and payload lands in the run directory, which doubles as an
// audit trail of the run.
//
// ## Stub Mode
//
// With a stub directory configured, exports are copied from it (same file
// names as the real exports, plus `flow-out-fqdn.csv` and
// `flow-iplist.csv`) and imports are written but never executed.

pub mod csv_io;
pub mod labels;
pub mod runner;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dna_core::report::StepRecord;
use dna_core::{AddressList, AddressListStore, Error, FlowRecord, Result, TimeWindow, TrafficSource};
use labels::LabelScopes;
use runner::ScriptRunner;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// Address list export script
pub const IPL_EXPORT_SCRIPT: &str = "workloader_ipl_export.sh";
/// Managed workload export script
pub const WORKLOAD_EXPORT_SCRIPT: &str = "workloader_wkld_m_export.sh";
/// Label export script
pub const LABEL_EXPORT_SCRIPT: &str = "workloader_label_export.sh";
/// Outbound traffic export script
pub const TRAFFIC_OUT_SCRIPT: &str = "workloader_traffic_out.sh";
/// Traffic-to-list export script
pub const TRAFFIC_IPLIST_SCRIPT: &str = "workloader_traffic_iplist.sh";
/// Address list import script
pub const IPL_IMPORT_SCRIPT: &str = "workloader_ipl_import.sh";
/// Address list delete script
pub const IPL_DELETE_SCRIPT: &str = "workloader_ipl_delete.sh";

/// Address list export file
pub const EXPORT_IPLISTS: &str = "export_iplists.csv";
/// Managed workload export file
pub const EXPORT_WORKLOADS: &str = "export_wkld.m.csv";
/// Label export file
pub const EXPORT_LABELS: &str = "export_label.csv";
/// Stub file standing in for the outbound traffic export
pub const STUB_FLOW_OUT: &str = "flow-out-fqdn.csv";
/// Stub file standing in for the traffic-to-list export
pub const STUB_FLOW_IPLIST: &str = "flow-iplist.csv";
/// Create payload file
pub const CREATE_PAYLOAD: &str = "new.iplist.new.fqdns.csv";
/// Update payload file
pub const UPDATE_PAYLOAD: &str = "update.iplist.existing.fqdns.csv";

/// Workloader adapter configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloaderConfig {
    /// Directory holding the wrapper scripts
    pub bin_dir: PathBuf,

    /// Directory receiving exports and payloads for this run
    pub run_dir: PathBuf,

    /// Copy exports from here instead of running scripts
    pub stub_dir: Option<PathBuf>,

    /// App label prefixes left out of the traffic source scope
    pub excluded_label_prefixes: Vec<String>,
}

impl WorkloaderConfig {
    /// Create a configuration running scripts from `bin_dir`
    pub fn new(bin_dir: impl Into<PathBuf>, run_dir: impl Into<PathBuf>) -> Self {
        Self {
            bin_dir: bin_dir.into(),
            run_dir: run_dir.into(),
            stub_dir: None,
            excluded_label_prefixes: Vec::new(),
        }
    }

    /// Use stub exports from `stub_dir`
    pub fn with_stub_dir(mut self, stub_dir: impl Into<PathBuf>) -> Self {
        self.stub_dir = Some(stub_dir.into());
        self
    }

    /// Exclude app labels starting with any of `prefixes`
    pub fn with_excluded_label_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.excluded_label_prefixes = prefixes;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        match &self.stub_dir {
            Some(stub_dir) if !stub_dir.is_dir() => Err(Error::config(format!(
                "Stub directory {} does not exist",
                stub_dir.display()
            ))),
            Some(_) => Ok(()),
            None if !self.bin_dir.is_dir() => Err(Error::config(format!(
                "Workloader bin directory {} does not exist",
                self.bin_dir.display()
            ))),
            None => Ok(()),
        }
    }
}

/// Workloader-backed address list store and traffic source
///
/// Cheap to clone; clones share the step log, so the same adapter can be
/// handed to the engine as both store and traffic source.
#[derive(Debug, Clone)]
pub struct Workloader {
    config: Arc<WorkloaderConfig>,
    runner: ScriptRunner,
}

impl Workloader {
    /// Create an adapter; the run directory is created if missing
    pub fn new(config: WorkloaderConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.run_dir)?;

        let runner = ScriptRunner::new(&config.bin_dir, &config.run_dir);
        if let Some(stub_dir) = &config.stub_dir {
            info!("Workloader stub mode: exports from {}", stub_dir.display());
        }

        Ok(Self {
            config: Arc::new(config),
            runner,
        })
    }

    /// Whether exports come from the stub directory
    pub fn is_stub(&self) -> bool {
        self.config.stub_dir.is_some()
    }

    /// Steps executed so far (exports, imports, deletes)
    pub fn steps(&self) -> Vec<StepRecord> {
        self.runner.steps()
    }

    fn path(&self, file_name: &str) -> PathBuf {
        self.config.run_dir.join(file_name)
    }

    /// Run an export script, or copy its stub
    async fn export(
        &self,
        step: &str,
        script: &str,
        args: Vec<String>,
        stub_file: &str,
        output: &Path,
    ) -> std::result::Result<(), String> {
        match &self.config.stub_dir {
            Some(stub_dir) => {
                self.runner.copy_stub(step, stub_dir, stub_file, output).await?;
                runner::ensure_output(step, output).await
            }
            None => self.runner.export(step, script, &args, output).await,
        }
    }

    /// Run the import script on a payload, unless in stub mode
    async fn import(&self, step: &str, payload: &Path) -> Result<()> {
        if self.is_stub() {
            info!("{}: stub mode, {} written but not imported", step, payload.display());
            self.runner.skip(step, format!("stub, {} not imported", payload.display()));
            return Ok(());
        }
        self.runner
            .run(step, IPL_IMPORT_SCRIPT, &[display(payload)])
            .await
            .map(|_| ())
            .map_err(Error::store)
    }

    async fn export_address_lists(&self, step: &str, output: &Path) -> Result<Vec<AddressList>> {
        self.export(step, IPL_EXPORT_SCRIPT, vec![display(output)], EXPORT_IPLISTS, output)
            .await
            .map_err(Error::store)?;
        csv_io::read_address_lists(output)
    }
}

#[async_trait]
impl AddressListStore for Workloader {
    async fn load_lists(&self) -> Result<Vec<AddressList>> {
        self.export_address_lists("export_iplists", &self.path(EXPORT_IPLISTS)).await
    }

    async fn create_lists(&self, lists: &[AddressList]) -> Result<()> {
        let payload = self.path(CREATE_PAYLOAD);
        csv_io::write_create_payload(&payload, lists)?;
        self.import("import_new_iplists", &payload).await
    }

    async fn update_lists(&self, lists: &[AddressList]) -> Result<()> {
        let payload = self.path(UPDATE_PAYLOAD);
        csv_io::write_update_payload(&payload, lists)?;
        self.import("update_existing_iplists", &payload).await
    }

    async fn create_temporary_list(&self, list: &AddressList) -> Result<String> {
        let payload = self.path(&format!("{}.csv", list.name));
        csv_io::write_create_payload(&payload, std::slice::from_ref(list))?;
        self.import("import_temporary_iplist", &payload).await?;

        if self.is_stub() {
            return Ok(format!("stub:{}", list.name));
        }

        // The import does not echo hrefs; read the list back to learn it
        let export = self.path(&format!("export_iplists.{}.csv", list.name));
        self.export_address_lists("export_temporary_iplist", &export)
            .await?
            .into_iter()
            .find(|stored| stored.name == list.name)
            .and_then(|stored| stored.identifier)
            .ok_or_else(|| Error::store(format!("Imported list {} not found in export", list.name)))
    }

    async fn delete_list(&self, identifier: &str) -> Result<()> {
        if self.is_stub() {
            self.runner.skip("delete_temporary_iplist", format!("stub, {} kept", identifier));
            return Ok(());
        }
        self.runner
            .run("delete_temporary_iplist", IPL_DELETE_SCRIPT, &[identifier.to_string()])
            .await
            .map(|_| ())
            .map_err(Error::store)
    }

    fn store_name(&self) -> &'static str {
        "workloader"
    }
}

#[async_trait]
impl TrafficSource for Workloader {
    async fn outbound_flows(&self, window: &TimeWindow) -> Result<Vec<FlowRecord>> {
        let workloads = self.path(EXPORT_WORKLOADS);
        let labels = self.path(EXPORT_LABELS);
        self.export(
            "export_managed_workloads",
            WORKLOAD_EXPORT_SCRIPT,
            vec![display(&workloads)],
            EXPORT_WORKLOADS,
            &workloads,
        )
        .await
        .map_err(Error::traffic)?;
        self.export(
            "export_labels",
            LABEL_EXPORT_SCRIPT,
            vec![display(&labels)],
            EXPORT_LABELS,
            &labels,
        )
        .await
        .map_err(Error::traffic)?;

        let scopes = LabelScopes::from_exports(&labels, &workloads, &self.config.excluded_label_prefixes)?;
        if scopes.managed_apps.is_empty() {
            warn!("No managed workload app label found; the traffic export will be unscoped");
        }
        let files = scopes.write(&self.config.run_dir).await?;

        let output = self.path(&format!("flow-out-fqdn-{}.csv", stamp(window.end)));
        let (start, end) = dates(window);
        self.export(
            "export_traffic",
            TRAFFIC_OUT_SCRIPT,
            vec![
                display(&files.managed_apps),
                display(&files.all_apps),
                display(&files.services),
                start,
                end,
                display(&output),
            ],
            STUB_FLOW_OUT,
            &output,
        )
        .await
        .map_err(Error::traffic)?;

        csv_io::read_flows(&output, window.end)
    }

    async fn flows_to_list(&self, list: &AddressList, window: &TimeWindow) -> Result<Vec<FlowRecord>> {
        let output = self.path(&format!("flow-iplist-{}.csv", stamp(window.end)));
        let (start, end) = dates(window);
        self.export(
            "export_traffic_to_temporary_iplist",
            TRAFFIC_IPLIST_SCRIPT,
            vec![list.name.clone(), start, end, display(&output)],
            STUB_FLOW_IPLIST,
            &output,
        )
        .await
        .map_err(Error::traffic)?;

        csv_io::read_flows(&output, window.end)
    }

    fn source_name(&self) -> &'static str {
        "workloader"
    }
}

fn display(path: &Path) -> String {
    path.display().to_string()
}

fn stamp(at: DateTime<Utc>) -> String {
    at.format("%Y%m%d-%H%M%S").to_string()
}

/// `YYYY-MM-DD` bounds of a window
fn dates(window: &TimeWindow) -> (String, String) {
    (
        window.start.format("%Y-%m-%d").to_string(),
        window.end.format("%Y-%m-%d").to_string(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_validate_requires_existing_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let run_dir = dir.path().join("run");

        assert!(WorkloaderConfig::new(dir.path(), &run_dir).validate().is_ok());
        assert!(WorkloaderConfig::new(dir.path().join("bin"), &run_dir).validate().is_err());
        assert!(
            WorkloaderConfig::new(dir.path().join("bin"), &run_dir)
                .with_stub_dir(dir.path())
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_window_dates() {
        let end = Utc.with_ymd_and_hms(2025, 6, 1, 8, 0, 0).unwrap();
        let window = TimeWindow::days_back(end, 7);
        assert_eq!(dates(&window), ("2025-05-25".to_string(), "2025-06-01".to_string()));
        assert_eq!(stamp(end), "20250601-080000");
    }
}

use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;

use exile_agent::exile::{ConfigurationSnapshot, Event, Job};
use exile_agent::workers::PluginSink;
use tempfile::TempDir;

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("agent.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

#[allow(dead_code)]
pub fn snapshot(org: &str) -> ConfigurationSnapshot {
    ConfigurationSnapshot {
        org_id: org.to_string(),
        org_name: format!("{} name", org),
        config_name: "default".to_string(),
        config_payload: format!(r#"{{"org":"{}"}}"#, org),
    }
}

/// Plugin sink that keeps everything it is handed.
#[allow(dead_code)]
#[derive(Debug, Default)]
pub struct CollectingPlugin {
    pub batches: Mutex<Vec<Vec<Event>>>,
    pub jobs: Mutex<Vec<Job>>,
}

impl PluginSink for CollectingPlugin {
    fn dispatch_events(&self, events: &[Event]) -> exile_agent::Result<()> {
        self.batches.lock().unwrap().push(events.to_vec());
        Ok(())
    }

    fn dispatch_job(&self, job: &Job) -> exile_agent::Result<()> {
        self.jobs.lock().unwrap().push(job.clone());
        Ok(())
    }
}

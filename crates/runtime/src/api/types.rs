//! Request and response types for the orchestrator API

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    #[serde(default)]
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct GenerateReportRequest {
    #[serde(default = "default_report_query")]
    pub query: String,
    #[serde(default)]
    pub custom_template: String,
}

fn default_report_query() -> String {
    "Intelligent Public Opinion Analysis Report".to_string()
}

pub type ConfigUpdateRequest = BTreeMap<String, String>;

#[derive(Debug, Serialize)]
pub struct EngineStatusEntry {
    pub status: String,
    pub port: u16,
}

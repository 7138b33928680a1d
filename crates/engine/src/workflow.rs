use std::collections::{HashMap, VecDeque};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::protocol::{RequirementsFulfilled, WorkflowRef};
use crate::registry::payload_entity_id;

pub const FEED_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowActivity {
    pub id: String,
    pub name: String,
    pub execution_time: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStage {
    pub id: String,
    pub name: String,
    pub entered_time: Option<i64>,
}

/// Client-side audit trail of one server workflow.
#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    pub id: String,
    pub name: String,
    pub activities: Vec<WorkflowActivity>,
    pub current_stage: Option<WorkflowStage>,
    pub requirements: Vec<String>,
}

impl Workflow {
    fn new(id: &str, name: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            name: name.unwrap_or(id).to_string(),
            activities: Vec::new(),
            current_stage: None,
            requirements: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FeedEntry {
    pub workflow_id: String,
    pub workflow_name: String,
    pub requirements: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct NamedPart {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowEntry {
    #[serde(default)]
    activity: Option<NamedPart>,
    #[serde(default)]
    stage: Option<NamedPart>,
    #[serde(default)]
    activity_id: Option<String>,
    #[serde(default)]
    stage_id: Option<String>,
    #[serde(default)]
    time: Option<i64>,
    #[serde(default)]
    workflow: Option<WorkflowRef>,
}

/// Workflows in first-seen order. Created lazily, never removed.
#[derive(Debug, Default)]
pub struct WorkflowBook {
    workflows: Vec<Workflow>,
    by_id: HashMap<String, usize>,
    feed: VecDeque<FeedEntry>,
}

impl WorkflowBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&Workflow> {
        self.by_id.get(id).map(|index| &self.workflows[*index])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Workflow> {
        self.workflows.iter()
    }

    pub fn len(&self) -> usize {
        self.workflows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflows.is_empty()
    }

    /// Most recent requirement notices, oldest first.
    pub fn feed(&self) -> impl Iterator<Item = &FeedEntry> {
        self.feed.iter()
    }

    pub fn record_activity(&mut self, payload: &Value) -> bool {
        let Some((entry, workflow)) = decode_entry(payload, "activity") else {
            return false;
        };
        let id = payload_entity_id(payload)
            .map(|id| id.to_string())
            .or_else(|| entry.activity_id.clone())
            .unwrap_or_default();
        let name = entry
            .activity
            .and_then(|part| part.name)
            .or(entry.activity_id)
            .unwrap_or_else(|| id.clone());

        let record = self.workflow_mut(&workflow);
        record.activities.push(WorkflowActivity {
            id,
            name,
            execution_time: entry.time,
        });
        true
    }

    pub fn set_current_stage(&mut self, payload: &Value) -> bool {
        let Some((entry, workflow)) = decode_entry(payload, "stage") else {
            return false;
        };
        let id = payload_entity_id(payload)
            .map(|id| id.to_string())
            .or_else(|| entry.stage_id.clone())
            .unwrap_or_default();
        let name = entry
            .stage
            .and_then(|part| part.name)
            .or(entry.stage_id)
            .unwrap_or_else(|| id.clone());

        self.workflow_mut(&workflow).current_stage = Some(WorkflowStage {
            id,
            name,
            entered_time: entry.time,
        });
        true
    }

    pub fn record_requirements(&mut self, message: &RequirementsFulfilled) {
        let record = self.workflow_mut(&message.workflow);
        record
            .requirements
            .extend(message.requirements.iter().cloned());
        let entry = FeedEntry {
            workflow_id: record.id.clone(),
            workflow_name: record.name.clone(),
            requirements: message.requirements.clone(),
        };
        if self.feed.len() == FEED_CAPACITY {
            self.feed.pop_front();
        }
        self.feed.push_back(entry);
    }

    fn workflow_mut(&mut self, reference: &WorkflowRef) -> &mut Workflow {
        let index = match self.by_id.get(reference.id()) {
            Some(index) => *index,
            None => {
                let index = self.workflows.len();
                self.workflows
                    .push(Workflow::new(reference.id(), reference.name()));
                self.by_id.insert(reference.id().to_string(), index);
                debug!(workflow = reference.id(), "workflow_created");
                index
            }
        };
        let workflow = &mut self.workflows[index];
        if let Some(name) = reference.name() {
            if workflow.name == workflow.id {
                workflow.name = name.to_string();
            }
        }
        workflow
    }
}

fn decode_entry(payload: &Value, kind: &'static str) -> Option<(WorkflowEntry, WorkflowRef)> {
    let mut entry = match serde_path_to_error::deserialize::<_, WorkflowEntry>(payload) {
        Ok(entry) => entry,
        Err(err) => {
            warn!(kind, path = %err.path(), error = %err.inner(), "workflow_entry_rejected");
            return None;
        }
    };
    let Some(workflow) = entry.workflow.take() else {
        debug!(kind, "workflow_entry_without_workflow");
        return None;
    };
    Some((entry, workflow))
}

//! Agent records and the registry that holds the live agent inventory.
mod registry;

pub use registry::{AgentListener, AgentRegistry};

use serde::{Deserialize, Serialize};

use crate::{Label, Set, TemplateId};

/// Records which cloud (and template) reserved the capacity of an agent.
///
/// Agents started through the control plane carry it; agents that existed before, or that were
/// created by other means, do not, and are matched to clouds by their names instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub cloud_name: String,
    pub cloud_id: String,
    pub template: Option<TemplateId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    name: String,
    display_name: Option<String>,
    num_executors: u32,
    #[serde(default)]
    labels: Set<Label>,
    #[serde(default)]
    provenance: Option<Provenance>,
}

impl Agent {
    pub fn new<S: Into<String>>(name: S, num_executors: u32) -> Self {
        Self {
            name: name.into(),
            display_name: None,
            num_executors,
            labels: Default::default(),
            provenance: None,
        }
    }

    pub fn with_display_name<S: Into<String>>(mut self, display_name: S) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    pub fn with_labels<I: IntoIterator<Item = Label>>(mut self, labels: I) -> Self {
        self.labels.extend(labels);
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Display name of the agent, the node name if none was set.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.name)
    }

    pub fn num_executors(&self) -> u32 {
        self.num_executors
    }

    pub fn labels(&self) -> &Set<Label> {
        &self.labels
    }

    /// Returns true if the agent can serve work for `label`.
    /// Unlabeled work can be served by any agent.
    pub fn matches_label(&self, label: Option<&Label>) -> bool {
        label.is_none_or(|label| self.labels.contains(label))
    }

    pub fn provenance(&self) -> Option<&Provenance> {
        self.provenance.as_ref()
    }

    pub fn set_provenance(&mut self, provenance: Provenance) {
        self.provenance = Some(provenance);
    }
}

#[cfg(test)]
mod tests {
    use super::Agent;
    use crate::Label;

    #[test]
    fn display_name_falls_back_to_name() {
        let agent = Agent::new("aws-linux-1234", 1);
        assert_eq!(agent.display_name(), "aws-linux-1234");
        let agent = agent.with_display_name("Linux (1234)");
        assert_eq!(agent.display_name(), "Linux (1234)");
        assert_eq!(agent.name(), "aws-linux-1234");
    }

    #[test]
    fn label_matching() {
        let agent = Agent::new("a", 1).with_labels([Label::from("linux")]);
        assert!(agent.matches_label(None));
        assert!(agent.matches_label(Some(&Label::from("linux"))));
        assert!(!agent.matches_label(Some(&Label::from("windows"))));
    }
}

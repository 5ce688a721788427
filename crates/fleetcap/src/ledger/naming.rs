//! Matching of agents to the clouds that started them.
//!
//! Agents with a [`Provenance`](crate::agent::Provenance) are matched exactly. Older agents only
//! have their names, so they are matched using the naming conventions of cloud plugins:
//! `<cloud>-<template>-<instance id>` or `<template>-<instance id>-<cloud>`. This is a guess and can
//! be wrong for clouds whose names are prefixes of each other; the longest matching cloud name
//! wins in that case.
use crate::agent::Agent;
use crate::cloud::CloudRef;
use crate::TemplateId;

/// Cloud that owns an agent, and the template the agent was (probably) started from.
pub struct AgentOwner {
    pub cloud: CloudRef,
    pub template: Option<TemplateId>,
}

/// Finds the cloud (and template) an agent belongs to.
pub fn resolve_owner(clouds: &[CloudRef], agent: &Agent) -> Option<AgentOwner> {
    if let Some(provenance) = agent.provenance() {
        let cloud = clouds
            .iter()
            .find(|cloud| cloud.identity().unique_id() == provenance.cloud_id)
            .or_else(|| {
                clouds
                    .iter()
                    .find(|cloud| cloud.name() == provenance.cloud_name)
            });
        if let Some(cloud) = cloud {
            return Some(AgentOwner {
                cloud: cloud.clone(),
                template: provenance.template.clone(),
            });
        }
        log::debug!(
            "Cloud {} of agent {} is no longer configured, falling back to name matching",
            provenance.cloud_name,
            agent.name()
        );
    }

    let cloud = clouds
        .iter()
        .filter(|cloud| belongs_to_cloud(agent, cloud.name()))
        .fold(None::<&CloudRef>, |best, cloud| match best {
            Some(best) if best.name().len() >= cloud.name().len() => Some(best),
            _ => Some(cloud),
        })?;
    Some(AgentOwner {
        cloud: cloud.clone(),
        template: extract_template(agent, cloud.name()),
    })
}

fn belongs_to_cloud(agent: &Agent, cloud_name: &str) -> bool {
    if cloud_name.is_empty() {
        return false;
    }
    [agent.name(), agent.display_name()]
        .into_iter()
        .any(|name| name_matches_cloud(name, cloud_name))
}

fn name_matches_cloud(name: &str, cloud_name: &str) -> bool {
    name == cloud_name
        || name
            .strip_prefix(cloud_name)
            .is_some_and(|rest| rest.starts_with('-'))
        || name
            .strip_suffix(cloud_name)
            .is_some_and(|rest| rest.ends_with('-'))
}

fn extract_template(agent: &Agent, cloud_name: &str) -> Option<TemplateId> {
    template_from_name(agent.name(), cloud_name)
        .or_else(|| {
            if agent.display_name() != agent.name() {
                template_from_name(agent.display_name(), cloud_name)
            } else {
                None
            }
        })
        .map(TemplateId::from)
}

/// `<cloud>-<template>-<instance id>` or `<template>-<instance id>-<cloud>` -> `<template>`
fn template_from_name(name: &str, cloud_name: &str) -> Option<String> {
    let name = name
        .strip_prefix(cloud_name)
        .and_then(|rest| rest.strip_prefix('-'))
        .or_else(|| {
            name.strip_suffix(cloud_name)
                .and_then(|rest| rest.strip_suffix('-'))
        })
        .unwrap_or(name);

    for separator in ['-', '_'] {
        if let Some((template, instance)) = name.rsplit_once(separator) {
            if !template.is_empty() && is_likely_instance_id(instance) {
                return Some(template.to_string());
            }
        }
    }
    None
}

fn is_likely_instance_id(value: &str) -> bool {
    if value.len() < 3 {
        return false;
    }
    if value.chars().all(|c| c.is_ascii_digit()) {
        return true;
    }
    // UUID-like
    if value.contains('-') && value.chars().all(|c| c.is_ascii_hexdigit() || c == '-') {
        return true;
    }
    // AWS instance ids (i-0123abcd)
    if value
        .strip_prefix("i-")
        .is_some_and(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_hexdigit()))
    {
        return true;
    }
    // Random suffixes; words tend to contain two vowels in a row
    value.len() > 6 && value.chars().all(|c| c.is_ascii_alphanumeric()) && !has_double_vowel(value)
}

fn has_double_vowel(value: &str) -> bool {
    let is_vowel = |c: char| matches!(c, 'a' | 'e' | 'i' | 'o' | 'u');
    value
        .chars()
        .zip(value.chars().skip(1))
        .any(|(a, b)| is_vowel(a) && is_vowel(b))
}

#[cfg(test)]
mod tests {
    use super::{is_likely_instance_id, resolve_owner, template_from_name};
    use crate::agent::{Agent, Provenance};
    use crate::cloud::CloudRef;
    use crate::tests::utils::TestCloudBuilder;
    use crate::TemplateId;

    fn clouds(names: &[&str]) -> Vec<CloudRef> {
        names
            .iter()
            .map(|name| TestCloudBuilder::default().name(*name).build() as CloudRef)
            .collect()
    }

    #[test]
    fn instance_ids() {
        assert!(is_likely_instance_id("123"));
        assert!(is_likely_instance_id("i-0abc12"));
        assert!(is_likely_instance_id("7f3k9x2q"));
        assert!(is_likely_instance_id("0c1d-ff02"));
        assert!(!is_likely_instance_id("12"));
        assert!(!is_likely_instance_id("agent"));
        assert!(!is_likely_instance_id("building"));
        assert!(!is_likely_instance_id("queueing"));
    }

    #[test]
    fn templates_from_names() {
        assert_eq!(
            template_from_name("aws-linux-1234", "aws").as_deref(),
            Some("linux")
        );
        assert_eq!(
            template_from_name("test-cloud-template1-node-123", "test-cloud").as_deref(),
            Some("template1-node")
        );
        assert_eq!(
            template_from_name("aws-linux_large_7f3k9x2q", "aws").as_deref(),
            Some("linux_large")
        );
        assert_eq!(
            template_from_name("linux-1234-gcp", "gcp").as_deref(),
            Some("linux")
        );
        assert_eq!(
            template_from_name("gpu_large-i-0abc12-gcp", "gcp").as_deref(),
            Some("gpu_large")
        );
        assert_eq!(template_from_name("aws-standalone", "aws"), None);
        assert_eq!(template_from_name("aws-build-agent", "aws"), None);
        assert_eq!(template_from_name("aws-1234", "aws"), None);
    }

    #[test]
    fn owner_by_prefix_and_suffix() {
        let clouds = clouds(&["aws", "gcp"]);
        let owner = resolve_owner(&clouds, &Agent::new("aws-linux-1234", 1)).unwrap();
        assert_eq!(owner.cloud.name(), "aws");
        assert_eq!(owner.template, Some(TemplateId::from("linux")));

        let owner = resolve_owner(&clouds, &Agent::new("linux-1234-gcp", 1)).unwrap();
        assert_eq!(owner.cloud.name(), "gcp");
        assert_eq!(owner.template, Some(TemplateId::from("linux")));

        assert!(resolve_owner(&clouds, &Agent::new("awsome-1234", 1)).is_none());
        assert!(resolve_owner(&clouds, &Agent::new("static-agent", 1)).is_none());
    }

    #[test]
    fn owner_by_display_name() {
        let clouds = clouds(&["aws"]);
        let agent = Agent::new("node-17", 1).with_display_name("aws-windows-5555");
        let owner = resolve_owner(&clouds, &agent).unwrap();
        assert_eq!(owner.cloud.name(), "aws");
        assert_eq!(owner.template, Some(TemplateId::from("windows")));
    }

    #[test]
    fn longest_cloud_name_wins() {
        let clouds = clouds(&["aws", "aws-gpu"]);
        let owner = resolve_owner(&clouds, &Agent::new("aws-gpu-cuda-1234", 1)).unwrap();
        assert_eq!(owner.cloud.name(), "aws-gpu");
        assert_eq!(owner.template, Some(TemplateId::from("cuda")));
    }

    #[test]
    fn provenance_takes_precedence() {
        let clouds = clouds(&["aws", "gcp"]);
        let agent = Agent::new("aws-linux-1234", 1).with_provenance(Provenance {
            cloud_name: "gcp".to_string(),
            cloud_id: clouds[1].identity().unique_id().to_string(),
            template: Some("big".into()),
        });
        let owner = resolve_owner(&clouds, &agent).unwrap();
        assert_eq!(owner.cloud.name(), "gcp");
        assert_eq!(owner.template, Some(TemplateId::from("big")));
    }

    #[test]
    fn provenance_of_removed_cloud_falls_back_to_name() {
        let clouds = clouds(&["aws"]);
        let agent = Agent::new("aws-linux-1234", 1).with_provenance(Provenance {
            cloud_name: "old".to_string(),
            cloud_id: "removed".to_string(),
            template: None,
        });
        let owner = resolve_owner(&clouds, &agent).unwrap();
        assert_eq!(owner.cloud.name(), "aws");
        assert_eq!(owner.template, Some(TemplateId::from("linux")));
    }
}

use serde::{Deserialize, Serialize};

use crate::{Map, TemplateId};

/// Upper bound on the number of executors that may be reserved at once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Cap {
    #[default]
    Unbounded,
    AtMost(u32),
}

impl Cap {
    /// Returns true if `requested` more executors fit on top of `current` ones.
    pub fn admits(&self, current: u32, requested: u32) -> bool {
        match self {
            Cap::Unbounded => true,
            Cap::AtMost(max) => current
                .checked_add(requested)
                .is_some_and(|total| total <= *max),
        }
    }

    /// How many executors can still be added on top of `current` ones.
    /// `None` means that there is no bound.
    pub fn headroom(&self, current: u32) -> Option<u32> {
        match self {
            Cap::Unbounded => None,
            Cap::AtMost(max) => Some(max.saturating_sub(current)),
        }
    }
}

/// Per-template caps of a single cloud.
///
/// Templates without an explicit override use `default`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TemplateCaps {
    #[serde(default)]
    default: Cap,
    #[serde(default)]
    overrides: Map<TemplateId, Cap>,
}

impl TemplateCaps {
    pub fn new(default: Cap) -> Self {
        Self {
            default,
            overrides: Default::default(),
        }
    }

    pub fn set(&mut self, template: TemplateId, cap: Cap) {
        self.overrides.insert(template, cap);
    }

    pub fn cap_for(&self, template: &TemplateId) -> Cap {
        self.overrides
            .get(template)
            .copied()
            .unwrap_or(self.default)
    }
}

/// Limiting policy of a cloud.
///
/// Clouds that are [`ProvisioningLimits::Unlimited`] do not take part in reservation accounting
/// at all: every reservation against them succeeds and nothing is recorded.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub enum ProvisioningLimits {
    #[default]
    Unlimited,
    Limited { global: Cap, templates: TemplateCaps },
}

impl ProvisioningLimits {
    /// Limited policy with the given global cap and no template caps.
    pub fn limited(global: u32) -> Self {
        ProvisioningLimits::Limited {
            global: Cap::AtMost(global),
            templates: TemplateCaps::default(),
        }
    }

    /// Adds a cap for `template`.
    /// An unlimited policy becomes limited with an unbounded global cap.
    pub fn with_template_cap<T: Into<TemplateId>>(self, template: T, cap: u32) -> Self {
        let (global, mut templates) = match self {
            ProvisioningLimits::Unlimited => (Cap::Unbounded, TemplateCaps::default()),
            ProvisioningLimits::Limited { global, templates } => (global, templates),
        };
        templates.set(template.into(), Cap::AtMost(cap));
        ProvisioningLimits::Limited { global, templates }
    }

    pub fn is_limited(&self) -> bool {
        matches!(self, ProvisioningLimits::Limited { .. })
    }

    pub fn global_cap(&self) -> Cap {
        match self {
            ProvisioningLimits::Unlimited => Cap::Unbounded,
            ProvisioningLimits::Limited { global, .. } => *global,
        }
    }

    pub fn template_cap(&self, template: &TemplateId) -> Cap {
        match self {
            ProvisioningLimits::Unlimited => Cap::Unbounded,
            ProvisioningLimits::Limited { templates, .. } => templates.cap_for(template),
        }
    }
}

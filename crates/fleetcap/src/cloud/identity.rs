use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::sync::OnceLock;

/// Name and unique identifier of a cloud.
///
/// The display name does not have to be unique; the unique id is generated lazily on first access
/// and then stays the same for the lifetime of the instance, including serialization round trips.
/// A copied configuration has to call [`CloudIdentity::duplicate`] or
/// [`CloudIdentity::regenerate_unique_id`] to stop sharing the id of its source.
#[derive(Debug)]
pub struct CloudIdentity {
    name: String,
    unique_id: OnceLock<String>,
}

impl CloudIdentity {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            unique_id: OnceLock::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unique_id(&self) -> &str {
        self.unique_id.get_or_init(generate_unique_id)
    }

    /// Replaces the unique id with a freshly generated one and returns it.
    pub fn regenerate_unique_id(&mut self) -> &str {
        let previous = self.unique_id.take();
        let id = loop {
            let id = generate_unique_id();
            if previous.as_ref() != Some(&id) {
                break id;
            }
        };
        self.unique_id.get_or_init(|| id)
    }

    /// Creates an identity with the same name and a new unique id.
    pub fn duplicate(&self) -> Self {
        Self::new(self.name.clone())
    }
}

fn generate_unique_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[derive(Serialize)]
struct IdentityRef<'a> {
    name: &'a str,
    unique_id: &'a str,
}

#[derive(Deserialize)]
struct StoredIdentity {
    name: String,
    // Configurations written before ids existed do not contain the field
    #[serde(default)]
    unique_id: Option<String>,
}

impl Serialize for CloudIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        IdentityRef {
            name: &self.name,
            unique_id: self.unique_id(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for CloudIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let stored = StoredIdentity::deserialize(deserializer)?;
        let unique_id = OnceLock::new();
        if let Some(id) = stored.unique_id.filter(|id| !id.is_empty()) {
            let _ = unique_id.set(id);
        }
        Ok(Self {
            name: stored.name,
            unique_id,
        })
    }
}

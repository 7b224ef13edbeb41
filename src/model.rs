//! Documents stored in the `users`, `networks` and `volumes` databases.
//!
//! Only the fields this layer addresses are typed; everything else a caller
//! puts in a document is carried through `extra` untouched.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A Beyond user, keyed by name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub name: String,
    /// Document key as reported on fetch; never written back
    #[serde(default, skip_serializing)]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dropbox_accounts: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub google_accounts: BTreeMap<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl User {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(name.to_string(), value.into());
        self
    }
}

/// A network, keyed by its qualified `owner/name`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    pub name: String,
    /// Passport per user name
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub passports: BTreeMap<String, Value>,
    /// Endpoints per user name, then per node
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub endpoints: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Network {
    pub fn new(owner: &str, name: &str) -> Self {
        Self {
            name: qualified_name(owner, name),
            ..Self::default()
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(name.to_string(), value.into());
        self
    }
}

/// A volume, keyed by its qualified `owner/name`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Volume {
    pub name: String,
    /// Qualified name of the network the volume lives on
    pub network: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Volume {
    pub fn new(owner: &str, name: &str, network: impl Into<String>) -> Self {
        Self {
            name: qualified_name(owner, name),
            network: network.into(),
            extra: Map::new(),
        }
    }

    pub fn with_field(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.extra.insert(name.to_string(), value.into());
        self
    }
}

/// Incremental change to a user, merged server side.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dropbox_accounts: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub google_accounts: Option<BTreeMap<String, Value>>,
}

impl UserUpdate {
    pub fn dropbox_account(mut self, id: &str, account: Value) -> Self {
        self.dropbox_accounts
            .get_or_insert_with(BTreeMap::new)
            .insert(id.to_string(), account);
        self
    }

    pub fn google_account(mut self, id: &str, account: Value) -> Self {
        self.google_accounts
            .get_or_insert_with(BTreeMap::new)
            .insert(id.to_string(), account);
        self
    }
}

/// Incremental change to a network, merged server side.
///
/// An endpoint set to `None` removes that node; a user left with no nodes is
/// removed as well.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passports: Option<BTreeMap<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoints: Option<BTreeMap<String, BTreeMap<String, Option<Value>>>>,
}

impl NetworkUpdate {
    pub fn passport(mut self, user: &str, passport: Value) -> Self {
        self.passports
            .get_or_insert_with(BTreeMap::new)
            .insert(user.to_string(), passport);
        self
    }

    pub fn endpoints(mut self, user: &str, node: &str, endpoints: Value) -> Self {
        self.endpoint_entry(user, node, Some(endpoints));
        self
    }

    pub fn remove_endpoints(mut self, user: &str, node: &str) -> Self {
        self.endpoint_entry(user, node, None);
        self
    }

    fn endpoint_entry(&mut self, user: &str, node: &str, value: Option<Value>) {
        self.endpoints
            .get_or_insert_with(BTreeMap::new)
            .entry(user.to_string())
            .or_default()
            .insert(node.to_string(), value);
    }
}

/// `owner/name`, the key of networks and volumes.
pub fn qualified_name(owner: &str, name: &str) -> String {
    format!("{owner}/{name}")
}

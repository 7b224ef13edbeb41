//! The `_design/beyond` documents and the server-side functions they carry.
//!
//! CouchDB runs these functions itself; this crate only ships their source.

use serde_json::{json, Map, Value};

/// Design document name shared by every collection.
pub const DESIGN: &str = "beyond";

/// Update handler used for incremental user and network changes.
pub const UPDATE_HANDLER: &str = "update";

/// View listing users by name.
pub const USERS_PER_NAME: &str = "per_name";

/// Merge OAuth account entries into a user document.
pub const USER_UPDATE: &str = r#"function (user, req) {
  if (user === null) {
    return [null, {code: 404}];
  }
  var update = {};
  for (var name in req.query) {
    update[name] = JSON.parse(req.query[name]);
  }
  ['dropbox_accounts', 'google_accounts'].forEach(function (field) {
    var accounts = update[field] || {};
    for (var id in accounts) {
      if (!user[field]) {
        user[field] = {};
      }
      user[field][id] = accounts[id];
    }
  });
  return [user, {json: user}];
}
"#;

/// Merge passports and endpoints into a network document. A `null`
/// endpoint removes the node; a user left without nodes is removed.
pub const NETWORK_UPDATE: &str = r#"function (network, req) {
  if (network === null) {
    return [null, {code: 404}];
  }
  var update = {};
  for (var name in req.query) {
    update[name] = JSON.parse(req.query[name]);
  }
  var passports = update.passports || {};
  for (var user in passports) {
    if (!network.passports) {
      network.passports = {};
    }
    network.passports[user] = passports[user];
  }
  var endpoints = update.endpoints || {};
  for (var owner in endpoints) {
    for (var node in endpoints[owner]) {
      if (!network.endpoints) {
        network.endpoints = {};
      }
      var nodes = network.endpoints[owner] || {};
      network.endpoints[owner] = nodes;
      var value = endpoints[owner][node];
      if (value === null) {
        delete nodes[node];
        if (Object.keys(nodes).length === 0) {
          delete network.endpoints[owner];
        }
      } else {
        nodes[node] = value;
      }
    }
  }
  return [network, {json: update}];
}
"#;

/// Map every user document under its name.
pub const USER_PER_NAME: &str = r#"function (user) {
  emit(user.name, user);
}
"#;

/// Id of the design document inside each database.
pub fn design_id() -> String {
    format!("_design/{DESIGN}")
}

/// Design document for the `users` database.
pub fn users_design() -> Value {
    json!({
        "_id": design_id(),
        "language": "javascript",
        "updates": { UPDATE_HANDLER: USER_UPDATE },
        "views": { USERS_PER_NAME: { "map": USER_PER_NAME } },
    })
}

/// Design document for the `networks` database.
pub fn networks_design() -> Value {
    json!({
        "_id": design_id(),
        "language": "javascript",
        "updates": { UPDATE_HANDLER: NETWORK_UPDATE },
    })
}

/// Overlay `design` onto an existing design document, keeping its `_rev`
/// and any field this crate does not manage.
pub fn merge_design(existing: Option<Value>, design: Value) -> Value {
    let mut merged = match existing {
        Some(Value::Object(map)) => map,
        _ => Map::new(),
    };
    if let Value::Object(fields) = design {
        merged.extend(fields);
    }
    Value::Object(merged)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn users_design_registers_update_and_view() {
        let design = users_design();
        assert_eq!(design["_id"], "_design/beyond");
        assert_eq!(design["language"], "javascript");
        assert_eq!(design["updates"]["update"], USER_UPDATE);
        assert_eq!(design["views"]["per_name"]["map"], USER_PER_NAME);
    }

    #[test]
    fn networks_design_has_no_views() {
        let design = networks_design();
        assert_eq!(design["updates"]["update"], NETWORK_UPDATE);
        assert!(design.get("views").is_none());
    }

    #[test]
    fn merge_keeps_the_existing_revision() {
        let existing = json!({
            "_id": "_design/beyond",
            "_rev": "3-abc",
            "updates": {"update": "function () {}"},
            "filters": {"mine": "function () {}"},
        });
        let merged = merge_design(Some(existing), networks_design());
        assert_eq!(merged["_rev"], "3-abc");
        assert_eq!(merged["updates"]["update"], NETWORK_UPDATE);
        assert_eq!(merged["filters"]["mine"], "function () {}");
    }

    #[test]
    fn merge_without_existing_document_is_the_design() {
        assert_eq!(merge_design(None, users_design()), users_design());
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Typed controller settings.

use serde::{Deserialize, Serialize};

/// Config key the controller settings live under.
pub const CONTROLLER_KEY: &str = "controller";

/// Facility this controller instance reconciles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PopSettings {
    /// Facility identifier in the facility graph.
    pub id: String,
    /// Facility name, written into every node's `pop` property.
    pub name: String,
    /// Sub-graph URL for this facility's resources.
    pub graph_url: String,
}

impl Default for PopSettings {
    fn default() -> Self {
        Self {
            id: "pop-1".into(),
            name: "default".into(),
            graph_url: "memory://pop-1".into(),
        }
    }
}

/// SDN controller endpoint and credentials.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdnSettings {
    /// REST base URL, e.g. `http://odl:8181/restconf/operational`.
    pub url: String,
    /// Basic-auth user.
    pub username: String,
    /// Basic-auth password.
    pub password: String,
}

/// Everything the controller service needs at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerSettings {
    /// Facility owned by this instance.
    pub pop: PopSettings,
    /// Optional SDN controller for this facility.
    pub sdn: Option<SdnSettings>,
    /// URL of the graph that holds facility nodes.
    pub pop_graph_url: String,
    /// Unix socket for event intake.
    pub socket_path: String,
    /// Directory hardware agents upload into.
    pub agents_data_path: String,
    /// Optional inventory snapshot used for the initial import.
    pub inventory_path: Option<String>,
    /// Run a full virtual import at startup.
    pub initial_import: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            pop: PopSettings::default(),
            sdn: None,
            pop_graph_url: "memory://pops".into(),
            socket_path: "/tmp/epa-controller.sock".into(),
            agents_data_path: "/var/lib/epa/agents".into(),
            inventory_path: None,
            initial_import: true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn partial_documents_fill_defaults() {
        let s: ControllerSettings =
            serde_json::from_str(r#"{"socket_path": "/run/epa.sock"}"#).unwrap();
        assert_eq!(s.socket_path, "/run/epa.sock");
        assert_eq!(s.pop, PopSettings::default());
        assert!(s.initial_import);
        assert!(s.sdn.is_none());
    }
}

//! Change notifications consumed from the state layer.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::connection::ConnectionSnapshot;
use crate::manager::{GraphManager, GraphSnapshot};
use crate::midi::MidiAction;
use crate::node::NodeSnapshot;
use crate::port::Centering;
use crate::shared::{SharedKind, SharedObject};
use crate::Id;

/// Every change the state layer can push at the graph.
///
/// ```
/// # use tonegraph::notification::GraphNotification;
/// let json = r#"{"action": "enableNode", "nodeId": "seq", "enabled": false}"#;
/// let notification: GraphNotification = serde_json::from_str(json).unwrap();
/// assert!(matches!(notification, GraphNotification::EnableNode { enabled: false, .. }));
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum GraphNotification {
    LoadGraph(GraphSnapshot),
    AddNode(NodeSnapshot),
    DeleteNode {
        node_id: Id,
    },
    EnableNode {
        node_id: Id,
        enabled: bool,
    },
    LoadNodePreset(NodeSnapshot),
    AddConnection(ConnectionSnapshot),
    DeleteConnection {
        connection_id: Id,
    },
    DeleteAllConnections,
    ChangeConnectionSource {
        connection_id: Id,
        node_id: Id,
        port_id: Id,
    },
    ChangeConnectionTarget {
        connection_id: Id,
        node_id: Id,
        port_id: Id,
    },
    AudioParamChange {
        node_id: Id,
        param_id: Id,
        value: f64,
    },
    CustomNumberParamChange {
        node_id: Id,
        param_id: Id,
        value: f64,
    },
    CustomEnumParamChange {
        node_id: Id,
        param_id: Id,
        value: String,
    },
    CustomStringParamChange {
        node_id: Id,
        param_id: Id,
        value: String,
    },
    CustomSetParamChange {
        node_id: Id,
        param_id: Id,
        value: BTreeSet<String>,
    },
    ReferenceParamChange {
        node_id: Id,
        param_id: Id,
        target_id: Id,
    },
    AudioParamInputGainChange {
        connection_id: Id,
        gain: f64,
    },
    AudioParamInputCenteringChange {
        connection_id: Id,
        centering: Centering,
    },
    NodeToNode {
        node_id: Id,
        midi: MidiAction,
    },
    UpsertShared {
        object: SharedObject,
    },
    DeleteShared {
        kind: SharedKind,
        id: Id,
    },
    TimelineTrackAddClip {
        track_id: Id,
        clip_id: Id,
    },
    TimelineTrackRemoveClip {
        track_id: Id,
        clip_id: Id,
    },
}

impl GraphManager {
    /// Apply one notification. Failures are logged by the operation and go no further.
    pub fn apply(&mut self, notification: GraphNotification) {
        use GraphNotification as N;

        let result = match notification {
            N::LoadGraph(snapshot) => {
                self.load_graph(snapshot);
                Ok(())
            }
            N::AddNode(snapshot) => self.add_node(snapshot),
            N::DeleteNode { node_id } => self.delete_node(&node_id),
            N::EnableNode { node_id, enabled } => self.enable_node(&node_id, enabled),
            N::LoadNodePreset(snapshot) => self.load_node_preset(&snapshot),
            N::AddConnection(snapshot) => self.add_connection(snapshot),
            N::DeleteConnection { connection_id } => self.delete_connection(&connection_id),
            N::DeleteAllConnections => {
                self.delete_all_connections();
                Ok(())
            }
            N::ChangeConnectionSource {
                connection_id,
                node_id,
                port_id,
            } => self.change_connection_source(&connection_id, node_id, port_id),
            N::ChangeConnectionTarget {
                connection_id,
                node_id,
                port_id,
            } => self.change_connection_target(&connection_id, node_id, port_id),
            N::AudioParamChange {
                node_id,
                param_id,
                value,
            } => self.on_audio_param_change(&node_id, &param_id, value),
            N::CustomNumberParamChange {
                node_id,
                param_id,
                value,
            } => self.on_custom_number_param_change(&node_id, &param_id, value),
            N::CustomEnumParamChange {
                node_id,
                param_id,
                value,
            } => self.on_custom_enum_param_change(&node_id, &param_id, &value),
            N::CustomStringParamChange {
                node_id,
                param_id,
                value,
            } => self.on_custom_string_param_change(&node_id, &param_id, &value),
            N::CustomSetParamChange {
                node_id,
                param_id,
                value,
            } => self.on_custom_set_param_change(&node_id, &param_id, value),
            N::ReferenceParamChange {
                node_id,
                param_id,
                target_id,
            } => self.on_reference_param_change(&node_id, &param_id, target_id),
            N::AudioParamInputGainChange { connection_id, gain } => {
                self.on_audio_param_input_gain_change(&connection_id, gain)
            }
            N::AudioParamInputCenteringChange {
                connection_id,
                centering,
            } => self.on_audio_param_input_centering_change(&connection_id, centering),
            N::NodeToNode { node_id, midi } => self.on_node_to_node(&node_id, midi),
            N::UpsertShared { object } => self.upsert_shared(object),
            N::DeleteShared { kind, id } => self.delete_shared(kind, &id),
            N::TimelineTrackAddClip { track_id, clip_id } => self.timeline_track_add_clip(&track_id, clip_id),
            N::TimelineTrackRemoveClip { track_id, clip_id } => self.timeline_track_remove_clip(&track_id, &clip_id),
        };

        if let Err(err) = result {
            trace!(%err, "notification dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EngineConfig;

    #[test]
    fn notifications_drive_the_manager() {
        let mut graph = GraphManager::new(EngineConfig::default());
        let add: GraphNotification = serde_json::from_str(r#"{"action": "addNode", "id": "g", "type": "gain"}"#).unwrap();
        assert_eq!(add, GraphNotification::AddNode(NodeSnapshot::new("g", crate::node::NodeKind::Gain)));
        graph.apply(add);
        assert_eq!(graph.node_count(), 1);

        graph.apply(GraphNotification::AudioParamChange {
            node_id: "g".into(),
            param_id: "gain".into(),
            value: 0.25,
        });
        let view = graph.render_node(&"g".into()).unwrap();
        assert_eq!(view.numbers[&Id::from("gain")], 0.25);

        // Unknown ids are logged and dropped.
        graph.apply(GraphNotification::DeleteNode { node_id: "missing".into() });
        graph.apply(GraphNotification::DeleteNode { node_id: "g".into() });
        assert_eq!(graph.node_count(), 0);
    }

    #[test]
    fn param_change_parses_from_json() {
        let json = r#"{"action": "customNumberParamChange", "nodeId": "seq", "paramId": "tempo", "value": 120}"#;
        let parsed: GraphNotification = serde_json::from_str(json).unwrap();
        assert_eq!(
            parsed,
            GraphNotification::CustomNumberParamChange {
                node_id: "seq".into(),
                param_id: "tempo".into(),
                value: 120.0,
            }
        );
    }
}

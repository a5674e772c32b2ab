use corral_core::{ModelError, StateModelDefinition};

use crate::{DefinitionError, LogTransition, ReplicaState, TransitionTable};

fn leader_standby_table() -> TransitionTable<()> {
    TransitionTable::builder(&StateModelDefinition::leader_standby())
        .transition("OFFLINE", "STANDBY", LogTransition)
        .transition("STANDBY", "LEADER", LogTransition)
        .transition("LEADER", "STANDBY", LogTransition)
        .transition("STANDBY", "OFFLINE", LogTransition)
        .transition("OFFLINE", "DROPPED", LogTransition)
        .recovery("OFFLINE", LogTransition)
        .build()
        .unwrap()
}

#[test]
fn test_table_reports_declared_edges() {
    let table = leader_standby_table();

    assert_eq!(table.model_name(), "LeaderStandby");
    assert_eq!(table.initial_state(), "OFFLINE");
    assert!(table.is_declared("DROPPED"));
    assert!(!table.is_declared("ERROR"));
    assert!(table.has_edge(&ReplicaState::declared("OFFLINE"), "STANDBY"));
    assert!(!table.has_edge(&ReplicaState::declared("OFFLINE"), "LEADER"));
    assert!(table.has_edge(&ReplicaState::Error, "OFFLINE"));
}

#[test]
fn test_path_follows_declared_edges() {
    let table = leader_standby_table();

    assert_eq!(
        table.path(&ReplicaState::declared("OFFLINE"), "LEADER"),
        Some(vec!["STANDBY".to_string(), "LEADER".to_string()])
    );
    assert_eq!(
        table.path(&ReplicaState::declared("LEADER"), "DROPPED"),
        Some(vec![
            "STANDBY".to_string(),
            "OFFLINE".to_string(),
            "DROPPED".to_string()
        ])
    );
    assert_eq!(
        table.path(&ReplicaState::Error, "STANDBY"),
        Some(vec!["OFFLINE".to_string(), "STANDBY".to_string()])
    );
    assert_eq!(
        table.path(&ReplicaState::declared("LEADER"), "LEADER"),
        Some(Vec::new())
    );
}

#[test]
fn test_path_to_unreachable_state() {
    let table = leader_standby_table();

    assert_eq!(table.path(&ReplicaState::declared("DROPPED"), "LEADER"), None);
    assert_eq!(table.path(&ReplicaState::declared("OFFLINE"), "MISSING"), None);
}

#[test]
fn test_build_rejects_unknown_states() {
    let err = TransitionTable::<()>::builder(&StateModelDefinition::online_offline())
        .transition("OFFLINE", "LEADER", LogTransition)
        .build()
        .unwrap_err();
    assert_eq!(err, DefinitionError::UnknownState("LEADER".into()));

    let err = TransitionTable::<()>::builder(&StateModelDefinition::online_offline())
        .recovery("STANDBY", LogTransition)
        .build()
        .unwrap_err();
    assert_eq!(err, DefinitionError::UnknownState("STANDBY".into()));
}

#[test]
fn test_build_rejects_duplicate_edges() {
    let err = TransitionTable::<()>::builder(&StateModelDefinition::online_offline())
        .transition("OFFLINE", "ONLINE", LogTransition)
        .transition("OFFLINE", "ONLINE", LogTransition)
        .build()
        .unwrap_err();
    assert_eq!(
        err,
        DefinitionError::DuplicateEdge {
            from: "OFFLINE".into(),
            to: "ONLINE".into()
        }
    );
}

#[test]
fn test_build_rejects_invalid_definition() {
    let mut definition = StateModelDefinition::online_offline();
    definition.initial_state = "BOOTING".into();

    let err = TransitionTable::<()>::builder(&definition)
        .build()
        .unwrap_err();
    assert!(matches!(
        err,
        DefinitionError::InvalidModel(ModelError::InvalidStateModel { .. })
    ));
}

//! Graph integrity across merges and relationship writes.

use serde_json::json;

use neotoma::engine::{
    CreateRelationshipRequest, ListRelationshipsRequest, MergeEntitiesRequest,
    SubmitPayloadRequest, TruthEngine,
};
use neotoma::{Direction, EntityId, ErrorCode, RelationshipType, TimelineFilter};

fn submit(engine: &TruthEngine, records: Vec<serde_json::Value>) -> Vec<EntityId> {
    engine
        .submit_payload(SubmitPayloadRequest {
            records,
            ..SubmitPayloadRequest::default()
        })
        .unwrap()
        .records
        .into_iter()
        .map(|r| r.entity_id)
        .collect()
}

fn relate(engine: &TruthEngine, ty: &str, from: &EntityId, to: &EntityId) -> Result<bool, ErrorCode> {
    engine
        .create_relationship(CreateRelationshipRequest {
            relationship_type: RelationshipType::new(ty).unwrap(),
            source_entity_id: from.clone(),
            target_entity_id: to.clone(),
            source_id: None,
            metadata: None,
        })
        .map(|r| r.created)
        .map_err(|e| e.code())
}

fn merge(engine: &TruthEngine, from: &EntityId, to: &EntityId) -> Result<usize, ErrorCode> {
    engine
        .merge_entities(&MergeEntitiesRequest {
            from_entity_id: from.clone(),
            to_entity_id: to.clone(),
        })
        .map(|r| r.relationships_rewritten)
        .map_err(|e| e.code())
}

#[test]
fn test_merge_chain_keeps_graph_healthy() {
    let engine = TruthEngine::in_memory().unwrap();
    let ids = submit(
        &engine,
        vec![
            json!({"entity_type": "person", "email": "a@example.com", "start_date": "2024-01-02"}),
            json!({"entity_type": "person", "email": "b@example.com"}),
            json!({"entity_type": "person", "email": "c@example.com"}),
            json!({"entity_type": "company", "name": "Initech"}),
        ],
    );
    let (a, b, c, initech) = (&ids[0], &ids[1], &ids[2], &ids[3]);

    assert_eq!(relate(&engine, "WORKS_AT", a, initech), Ok(true));
    assert_eq!(relate(&engine, "WORKS_AT", a, initech), Ok(false));
    assert_eq!(relate(&engine, "KNOWS", b, a), Ok(true));

    // KNOWS(b, a) would become a self-loop and is dropped.
    assert_eq!(merge(&engine, a, b), Ok(2));
    assert_eq!(merge(&engine, b, c), Ok(1));

    // A merged entity resolves to its final target everywhere.
    let view = engine.get_entity_snapshot(a).unwrap();
    assert_eq!(&view.entity.id, c);
    assert_eq!(view.snapshot.observation_count, 3);

    let listed = engine
        .list_relationships(&ListRelationshipsRequest {
            entity_id: a.clone(),
            direction: Direction::Outgoing,
            relationship_type: Some(RelationshipType::new("WORKS_AT").unwrap()),
        })
        .unwrap();
    assert_eq!(&listed.entity_id, c);
    assert_eq!(listed.relationships.len(), 1);
    assert_eq!(&listed.relationships[0].target_entity_id, initech);

    let events = engine
        .list_timeline_events(TimelineFilter {
            entity_id: Some(a.clone()),
            ..TimelineFilter::default()
        })
        .unwrap();
    assert_eq!(events.events.len(), 1);
    assert_eq!(&events.events[0].entity_id, c);

    let report = engine.check_graph_integrity().unwrap();
    assert!(report.healthy(), "{report:?}");
    assert_eq!(report.entity_count, 2);
    assert_eq!(report.observation_count, 4);

    assert_eq!(merge(&engine, a, c), Err(ErrorCode::EntityAlreadyMerged));
    assert_eq!(merge(&engine, c, c), Err(ErrorCode::ValidationError));
}

#[test]
fn test_acyclic_types_stay_acyclic() {
    let engine = TruthEngine::in_memory().unwrap();
    let ids = submit(
        &engine,
        vec![
            json!({"entity_type": "project", "name": "Apollo"}),
            json!({"entity_type": "project", "name": "Gemini"}),
            json!({"entity_type": "project", "name": "Mercury"}),
        ],
    );
    let (apollo, gemini, mercury) = (&ids[0], &ids[1], &ids[2]);

    assert_eq!(relate(&engine, "DEPENDS_ON", apollo, gemini), Ok(true));
    assert_eq!(relate(&engine, "DEPENDS_ON", gemini, mercury), Ok(true));
    assert_eq!(
        relate(&engine, "DEPENDS_ON", mercury, apollo),
        Err(ErrorCode::CycleDetected)
    );
    // Other types may form cycles.
    assert_eq!(relate(&engine, "RELATED_TO", mercury, apollo), Ok(true));

    // Merging Mercury into Apollo would close Apollo -> Gemini -> Apollo.
    assert_eq!(merge(&engine, mercury, apollo), Err(ErrorCode::CycleDetected));
    assert!(engine.check_graph_integrity().unwrap().healthy());
}

#[test]
fn test_self_relationship_is_rejected() {
    let engine = TruthEngine::in_memory().unwrap();
    let ids = submit(&engine, vec![json!({"entity_type": "company", "name": "Hooli"})]);
    assert_eq!(
        relate(&engine, "PART_OF", &ids[0], &ids[0]),
        Err(ErrorCode::ValidationError)
    );
}

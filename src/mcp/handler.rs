//! JSON-in, JSON-out action dispatch.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::engine::{
    CorrectRequest, CreateRelationshipRequest, FieldProvenanceRequest, GetEntityRequest,
    GetSourceRequest, ListObservationsRequest, ListRelationshipsRequest, MergeEntitiesRequest,
    NoArguments, SubmitPayloadRequest, TruthEngine, UploadSourceRequest,
};
use crate::error::{ErrorEnvelope, NeotomaError, NeotomaResult, ValidationError};
use crate::ids::TraceId;
use crate::search::SearchRequest;
use crate::timeline::TimelineFilter;

use super::actions::Action;

fn parse_arguments<T: DeserializeOwned>(arguments: Value) -> NeotomaResult<T> {
    let arguments = if arguments.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        arguments
    };
    serde_json::from_value(arguments).map_err(|e| {
        ValidationError::InvalidRequest {
            message: e.to_string(),
        }
        .into()
    })
}

fn to_value<T: Serialize>(response: &T) -> NeotomaResult<Value> {
    serde_json::to_value(response)
        .map_err(|e| NeotomaError::internal(format!("failed to serialize response: {e}")))
}

/// Calls engine operations by action name.
#[derive(Debug, Clone)]
pub struct ActionHandler {
    engine: Arc<TruthEngine>,
}

impl ActionHandler {
    /// Creates a handler over a shared engine.
    #[must_use]
    pub fn new(engine: Arc<TruthEngine>) -> Self {
        Self { engine }
    }

    /// The engine actions run against.
    #[must_use]
    pub fn engine(&self) -> &Arc<TruthEngine> {
        &self.engine
    }

    /// Runs one action.
    ///
    /// # Errors
    /// Every failure, including an unknown action name or malformed
    /// arguments, is returned as an [`ErrorEnvelope`] with a fresh trace ID.
    pub fn call(&self, name: &str, arguments: Value) -> Result<Value, ErrorEnvelope> {
        let trace_id = TraceId::new();
        let span = tracing::info_span!("action", action = %name, trace_id = %trace_id);
        let _enter = span.enter();

        let result = name
            .parse::<Action>()
            .map_err(NeotomaError::from)
            .and_then(|action| self.dispatch(action, arguments));

        match result {
            Ok(value) => {
                tracing::debug!("action completed");
                Ok(value)
            }
            Err(err) => {
                let envelope = ErrorEnvelope::from_error(&err, trace_id);
                if err.code().is_retryable() || matches!(err, NeotomaError::Internal { .. }) {
                    tracing::error!(code = %err.code(), error = %err, "action failed");
                } else {
                    tracing::info!(code = %err.code(), error = %err, "action rejected");
                }
                Err(envelope)
            }
        }
    }

    fn dispatch(&self, action: Action, arguments: Value) -> NeotomaResult<Value> {
        let engine = &self.engine;
        match action {
            Action::SubmitPayload => {
                to_value(&engine.submit_payload(parse_arguments::<SubmitPayloadRequest>(arguments)?)?)
            }
            Action::UploadSource => {
                to_value(&engine.upload_source(parse_arguments::<UploadSourceRequest>(arguments)?)?)
            }
            Action::GetSource => {
                let request: GetSourceRequest = parse_arguments(arguments)?;
                to_value(&engine.get_source(&request.source_id)?)
            }
            Action::RetrieveEntities => {
                let request: SearchRequest = parse_arguments(arguments)?;
                to_value(&engine.retrieve_entities(&request)?)
            }
            Action::GetEntitySnapshot => {
                let request: GetEntityRequest = parse_arguments(arguments)?;
                to_value(&engine.get_entity_snapshot(&request.entity_id)?)
            }
            Action::ListObservations => {
                let request: ListObservationsRequest = parse_arguments(arguments)?;
                to_value(&engine.list_observations(&request)?)
            }
            Action::GetFieldProvenance => {
                let request: FieldProvenanceRequest = parse_arguments(arguments)?;
                to_value(&engine.get_field_provenance(&request)?)
            }
            Action::Correct => to_value(&engine.correct(parse_arguments::<CorrectRequest>(arguments)?)?),
            Action::MergeEntities => {
                let request: MergeEntitiesRequest = parse_arguments(arguments)?;
                to_value(&engine.merge_entities(&request)?)
            }
            Action::CreateRelationship => to_value(
                &engine.create_relationship(parse_arguments::<CreateRelationshipRequest>(arguments)?)?,
            ),
            Action::ListRelationships => {
                let request: ListRelationshipsRequest = parse_arguments(arguments)?;
                to_value(&engine.list_relationships(&request)?)
            }
            Action::ListTimelineEvents => {
                to_value(&engine.list_timeline_events(parse_arguments::<TimelineFilter>(arguments)?)?)
            }
            Action::CheckGraphIntegrity => {
                parse_arguments::<NoArguments>(arguments)?;
                to_value(&engine.check_graph_integrity()?)
            }
            Action::ListEntityTypes => {
                parse_arguments::<NoArguments>(arguments)?;
                to_value(&engine.list_entity_types()?)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;
    use serde_json::json;

    fn handler() -> ActionHandler {
        ActionHandler::new(Arc::new(TruthEngine::in_memory().unwrap()))
    }

    #[test]
    fn submit_then_snapshot() {
        let handler = handler();
        let submitted = handler
            .call(
                "submit_payload",
                json!({"records": [{"entity_type": "person", "name": "Grace Hopper", "email": "grace@navy.mil"}]}),
            )
            .unwrap();
        let entity_id = submitted["records"][0]["entity_id"].clone();
        assert_eq!(submitted["deduplicated"], json!(false));

        let snapshot = handler
            .call("get_entity_snapshot", json!({"entity_id": entity_id}))
            .unwrap();
        assert_eq!(snapshot["snapshot"]["fields"]["name"], json!("Grace Hopper"));
        assert_eq!(snapshot["entity"]["canonical_name"], json!("grace@navy.mil"));
    }

    #[test]
    fn unknown_action_is_an_envelope() {
        let envelope = handler().call("drop_tables", Value::Null).unwrap_err();
        assert_eq!(envelope.error.code, ErrorCode::UnknownAction);
        assert_eq!(envelope.error.details["action"], json!("drop_tables"));
    }

    #[test]
    fn malformed_arguments_are_validation_errors() {
        let handler = handler();
        let envelope = handler
            .call("get_entity_snapshot", json!({"entity": "x"}))
            .unwrap_err();
        assert_eq!(envelope.error.code, ErrorCode::ValidationError);
        assert!(envelope.error.details["reason"].as_str().unwrap().contains("unknown field"));

        let envelope = handler
            .call("get_entity_snapshot", json!({"entity_id": "not-an-id"}))
            .unwrap_err();
        assert_eq!(envelope.error.code, ErrorCode::ValidationError);
    }

    #[test]
    fn misspelled_query_fields_are_rejected() {
        let handler = handler();
        for (action, arguments) in [
            ("retrieve_entities", json!({"querry": "acme"})),
            ("list_timeline_events", json!({"entity_idd": "ent_00000000000000000000000000000000"})),
        ] {
            let envelope = handler.call(action, arguments).unwrap_err();
            assert_eq!(envelope.error.code, ErrorCode::ValidationError, "{action}");
            assert!(envelope.error.details["reason"].as_str().unwrap().contains("unknown field"));
        }
        assert!(handler.call("retrieve_entities", json!({"query": "acme"})).is_ok());
    }

    #[test]
    fn zero_limit_is_rejected() {
        let handler = handler();
        let submitted = handler
            .call("submit_payload", json!({"records": [{"entity_type": "company", "name": "Acme"}]}))
            .unwrap();
        let entity_id = submitted["records"][0]["entity_id"].clone();

        for (action, arguments) in [
            ("retrieve_entities", json!({"query": "acme", "limit": 0})),
            ("list_timeline_events", json!({"limit": 0})),
            ("list_observations", json!({"entity_id": entity_id.clone(), "limit": 0})),
        ] {
            let envelope = handler.call(action, arguments).unwrap_err();
            assert_eq!(envelope.error.code, ErrorCode::ValidationError, "{action}");
        }

        let page = handler
            .call("list_observations", json!({"entity_id": entity_id, "limit": 1}))
            .unwrap();
        assert_eq!(page["limit"], json!(1));
        let events = handler.call("list_timeline_events", json!({"limit": 5000})).unwrap();
        assert_eq!(events["limit"], json!(500));
    }

    #[test]
    fn argumentless_actions_accept_null() {
        let handler = handler();
        let types = handler.call("list_entity_types", Value::Null).unwrap();
        assert_eq!(types["entity_types"].as_array().unwrap().len(), 4);
        let report = handler.call("check_graph_integrity", json!({})).unwrap();
        assert_eq!(report["entity_count"], json!(0));
    }

    #[test]
    fn trace_ids_are_fresh() {
        let handler = handler();
        let a = handler.call("get_source", json!({"source_id": "nope"})).unwrap_err();
        let b = handler.call("get_source", json!({"source_id": "nope"})).unwrap_err();
        assert_ne!(a.error.trace_id, b.error.trace_id);
    }
}

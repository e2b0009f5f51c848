use std::collections::BTreeMap;

use chrono::{Duration, TimeZone, Utc};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use serde_json::json;

use neotoma::engine::{SubmitPayloadRequest, TruthEngine};
use neotoma::{
    Entity, EntityType, Observation, Reducer, SchemaRegistry, SearchRequest, SourceId,
};

fn observations(entity: &Entity, count: u32) -> Vec<Observation> {
    let base = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    (0..count)
        .map(|i| {
            let source = SourceId::for_content(format!("bench-source-{i}").as_bytes());
            let mut fields = BTreeMap::new();
            fields.insert("name".to_string(), json!(format!("Bench Person {}", i % 7)));
            fields.insert("email".to_string(), json!("bench@example.com"));
            fields.insert("phone".to_string(), json!(format!("+1-555-{i:04}")));
            fields.insert("tags".to_string(), json!([format!("t{}", i % 13), "bench"]));
            fields.insert("birth_date".to_string(), json!("1990-05-17"));
            Observation::new(
                entity.id.clone(),
                entity.entity_type.clone(),
                source,
                0,
                fields,
                i32::try_from(i % 200).unwrap(),
                base + Duration::seconds(i64::from(i)),
            )
        })
        .collect()
}

fn bench_reduce(c: &mut Criterion) {
    let registry = SchemaRegistry::new();
    let person = EntityType::new("person").unwrap();
    let schema = registry.get(&person).unwrap();
    let entity = Entity::new(person, "bench@example.com", "bench@example.com", Utc::now());

    let mut group = c.benchmark_group("reducer/reduce");
    for count in [16u32, 256, 4096] {
        let obs = observations(&entity, count);
        group.throughput(Throughput::Elements(u64::from(count)));
        group.bench_with_input(BenchmarkId::from_parameter(count), &obs, |b, obs| {
            b.iter(|| Reducer::reduce(black_box(&entity), &schema, black_box(obs)));
        });
    }
    group.finish();
}

fn seeded_engine(entities: usize) -> TruthEngine {
    let engine = TruthEngine::in_memory().unwrap();
    let records = (0..entities)
        .map(|i| {
            json!({
                "entity_type": "company",
                "name": format!("Company {i}"),
                "industry": ["logistics", "robotics", "finance", "retail"][i % 4],
                "address": format!("{i} Market Street")
            })
        })
        .collect();
    engine
        .submit_payload(SubmitPayloadRequest {
            records,
            ..SubmitPayloadRequest::default()
        })
        .unwrap();
    engine.sync_index().unwrap();
    engine
}

fn bench_search(c: &mut Criterion) {
    let engine = seeded_engine(2000);
    let mut group = c.benchmark_group("search/retrieve_entities");
    for query in ["robotics", "company 1999", "market street"] {
        let request = SearchRequest {
            query: query.to_string(),
            limit: Some(20),
            ..SearchRequest::default()
        };
        group.bench_with_input(BenchmarkId::from_parameter(query), &request, |b, request| {
            b.iter(|| engine.retrieve_entities(black_box(request)).unwrap());
        });
    }
    group.finish();
}

fn bench_ingest(c: &mut Criterion) {
    c.bench_function("engine/submit_payload_dedup", |b| {
        let engine = TruthEngine::in_memory().unwrap();
        let request = SubmitPayloadRequest {
            records: vec![json!({"entity_type": "person", "email": "ada@example.com", "name": "Ada"})],
            ..SubmitPayloadRequest::default()
        };
        engine.submit_payload(request.clone()).unwrap();
        b.iter(|| engine.submit_payload(black_box(request.clone())).unwrap());
    });
}

criterion_group!(reducer, bench_reduce, bench_search, bench_ingest);
criterion_main!(reducer);

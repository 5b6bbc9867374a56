mod common;

use anyhow::{Context, Result};
use chrono::{FixedOffset, NaiveDate, TimeZone};
use pgbulk::{
    BatchEngine, BatchError, DeleteRequest, FieldValue, Record, SelectRequest, TableRef,
    WriteOutcome,
};

use common::{people, people_transport, Call};

#[tokio::test]
async fn insert_of_one_shape_is_one_statement_without_returning() -> Result<()> {
    let transport = people_transport();
    let engine = BatchEngine::new(&transport);
    let records = vec![
        Record::new().with("id", 1).with("name", "a"),
        Record::new().with("id", 2).with("name", "b"),
    ];

    let outcome = engine
        .bulk_insert(&people(), &records, Some(""))
        .await
        .context("bulk insert")?;
    assert!(matches!(outcome, WriteOutcome::Applied { statements: 1, .. }));

    let executed = transport.executed();
    assert_eq!(executed.len(), 1);
    let (sql, params) = &executed[0];
    assert_eq!(
        sql,
        "INSERT INTO public.t (id, name) VALUES ($1::int4, $2::text), ($3::int4, $4::text)"
    );
    assert_eq!(params.len(), 4);
    assert!(!sql.contains("RETURNING"));

    // schema is fetched exactly once, before any statement
    assert_eq!(transport.calls()[0], Call::Columns(people()));
    Ok(())
}

#[tokio::test]
async fn returning_rows_are_concatenated_in_partition_order() -> Result<()> {
    let transport = people_transport();
    transport.push_rows(vec![
        Record::new().with("id", 1),
        Record::new().with("id", 3),
    ]);
    transport.push_rows(vec![Record::new().with("id", 2)]);
    let engine = BatchEngine::new(&transport);
    let records = vec![
        Record::new().with("id", 1).with("name", "a"),
        Record::new().with("id", 2),
        Record::new().with("id", 3).with("name", "c"),
    ];

    let rows = engine
        .bulk_insert(&people(), &records, Some("id"))
        .await?
        .into_rows();
    let ids: Vec<_> = rows.iter().filter_map(|row| row.get("id")).cloned().collect();
    assert_eq!(
        ids,
        vec![FieldValue::Int(1), FieldValue::Int(3), FieldValue::Int(2)]
    );

    let executed = transport.executed();
    assert_eq!(executed.len(), 2);
    assert!(executed[0].0.ends_with("RETURNING id"));
    assert_eq!(executed[1].0, "INSERT INTO public.t (id) VALUES ($1::int4) RETURNING id");
    Ok(())
}

#[tokio::test]
async fn enum_columns_bind_as_text_with_server_cast() -> Result<()> {
    let transport = people_transport();
    let engine = BatchEngine::new(&transport);
    let records = vec![Record::new().with("id", 5).with("mood", "happy")];
    engine.bulk_insert(&people(), &records, None).await?;

    let (sql, params) = &transport.executed()[0];
    assert_eq!(
        sql,
        "INSERT INTO public.t (id, mood) VALUES ($1::int4, $2::text::public.mood)"
    );
    assert_eq!(params[1], FieldValue::Text("happy".into()));
    Ok(())
}

#[tokio::test]
async fn update_by_key_sets_non_key_columns_only() -> Result<()> {
    let transport = people_transport();
    let engine = BatchEngine::new(&transport);
    let records = vec![Record::new().with("id", 1).with("name", "x")];

    let outcome = engine
        .bulk_update_by_keys(&people(), &records, &["id"])
        .await?;
    assert!(matches!(outcome, WriteOutcome::Applied { statements: 1, .. }));

    let (sql, params) = &transport.executed()[0];
    assert_eq!(
        sql,
        "UPDATE public.t AS t SET name = c.name FROM (VALUES ($1::int4, $2::text)) AS c(id, name) WHERE c.id::int4 = t.id"
    );
    assert_eq!(
        params,
        &vec![FieldValue::Int(1), FieldValue::Text("x".into())]
    );
    Ok(())
}

#[tokio::test]
async fn update_with_missing_key_names_the_record_and_sends_nothing() {
    let transport = people_transport();
    let engine = BatchEngine::new(&transport);
    let records = vec![
        Record::new().with("id", 1).with("name", "x"),
        Record::new().with("name", "y"),
    ];

    let err = engine
        .bulk_update_by_keys(&people(), &records, &["id"])
        .await
        .unwrap_err();
    match err {
        BatchError::MissingKeyColumn { index, key, .. } => {
            assert_eq!(index, 1);
            assert_eq!(key, "id");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn empty_inputs_are_rejected_before_any_lookup() {
    let transport = people_transport();
    let engine = BatchEngine::new(&transport);

    let err = engine.bulk_insert(&people(), &[], None).await.unwrap_err();
    assert!(matches!(err, BatchError::NoRecords { .. }));

    let err = engine
        .bulk_update_by_keys::<&str>(&people(), &[], &[])
        .await
        .unwrap_err();
    assert!(matches!(err, BatchError::NoRecords { .. }));

    let records = vec![Record::new().with("id", 1).with("name", "x")];
    let err = engine
        .bulk_update_by_keys::<&str>(&people(), &records, &[])
        .await
        .unwrap_err();
    assert!(matches!(err, BatchError::NoKeyColumns { .. }));

    assert!(transport.calls().is_empty());
}

#[tokio::test]
async fn unknown_column_fails_before_execution() {
    let transport = people_transport();
    let engine = BatchEngine::new(&transport);
    let records = vec![
        Record::new().with("id", 1),
        Record::new().with("id", 2).with("nickname", "z"),
    ];

    let err = engine.bulk_insert(&people(), &records, None).await.unwrap_err();
    assert!(
        matches!(err, BatchError::UnknownColumn { ref column, .. } if column == "nickname"),
        "unexpected error: {err}"
    );
    assert_eq!(transport.calls(), vec![Call::Columns(people())]);
}

#[tokio::test]
async fn statements_are_all_rendered_before_the_first_runs() {
    let transport = people_transport();
    let engine = BatchEngine::new(&transport);
    // second shape carries nothing but the key
    let records = vec![
        Record::new().with("id", 1).with("name", "x"),
        Record::new().with("id", 2),
    ];

    let err = engine
        .bulk_update_by_keys(&people(), &records, &["id"])
        .await
        .unwrap_err();
    assert!(matches!(err, BatchError::NothingToUpdate { partition: 1, .. }));
    assert!(transport.executed().is_empty());
}

#[tokio::test]
async fn failing_partition_stops_the_batch_and_reports_progress() {
    let transport = people_transport();
    transport.push_reply(Default::default());
    transport.push_failure("duplicate key value violates unique constraint (SQLSTATE 23505)");
    let engine = BatchEngine::new(&transport);
    let records = vec![
        Record::new().with("id", 1),
        Record::new().with("id", 2).with("name", "b"),
        Record::new().with("id", 3).with("mood", "ok"),
    ];

    let err = engine.bulk_insert(&people(), &records, None).await.unwrap_err();
    match &err {
        BatchError::PartitionTransport {
            table,
            partition,
            completed,
            source,
        } => {
            assert_eq!(table, "public.t");
            assert_eq!(*partition, 1);
            assert_eq!(*completed, 1);
            assert!(source.message().contains("23505"));
        }
        other => panic!("unexpected error: {other}"),
    }
    // the third partition never starts
    assert_eq!(transport.executed().len(), 2);

    let snapshot = engine.metrics().snapshot();
    assert_eq!(snapshot.statements_executed, 1);
    assert_eq!(snapshot.statement_failures, 1);
    assert_eq!(snapshot.partitions, 3);
}

#[tokio::test]
async fn uncoercible_value_fails_its_partition_and_stops_the_batch() {
    let transport = people_transport();
    let engine = BatchEngine::new(&transport);
    let records = vec![
        Record::new().with("id", 1),
        Record::new().with("id", 2).with("ref_id", "not-a-uuid"),
        Record::new().with("id", 3).with("name", "c"),
    ];

    let err = engine.bulk_insert(&people(), &records, None).await.unwrap_err();
    match &err {
        BatchError::PartitionTransport {
            partition,
            completed,
            source,
            ..
        } => {
            assert_eq!((*partition, *completed), (1, 1));
            assert!(source.message().contains("parameter 1"), "{}", source.message());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!err.is_validation());
    let executed = transport.executed();
    assert_eq!(executed.len(), 2);
    assert!(executed[1].0.contains("$2::uuid"));
}

#[tokio::test]
async fn interval_and_array_columns_travel_as_text() -> Result<()> {
    let transport = people_transport();
    let engine = BatchEngine::new(&transport);
    let records = pgbulk::read_records(
        r#"[{"id": 1, "span": "90 minutes", "tags": ["a", "b"], "ref_id": "123e4567-e89b-12d3-a456-426614174000"}]"#
            .as_bytes(),
    )?;

    engine.bulk_insert(&people(), &records, None).await?;

    let (sql, params) = &transport.executed()[0];
    assert_eq!(
        sql,
        "INSERT INTO public.t (id, span, tags, ref_id) \
VALUES ($1::int4, $2::text::interval, $3::text::_text, $4::uuid)"
    );
    assert_eq!(params[1], FieldValue::Text("90 minutes".into()));
    assert_eq!(params[2], FieldValue::Text(r#"{"a","b"}"#.into()));
    Ok(())
}

#[tokio::test]
async fn schema_lookup_failure_is_a_hard_error() {
    let transport = people_transport().failing_columns();
    let engine = BatchEngine::new(&transport);
    let records = vec![Record::new().with("id", 1)];

    let err = engine.bulk_insert(&people(), &records, None).await.unwrap_err();
    assert!(matches!(err, BatchError::SchemaLookup { .. }));
    assert!(transport.executed().is_empty());
}

#[tokio::test]
async fn delete_without_predicate_needs_the_gate() -> Result<()> {
    let transport = people_transport();
    let engine = BatchEngine::new(&transport);

    let err = engine
        .delete(&DeleteRequest::new(people()))
        .await
        .unwrap_err();
    assert!(matches!(err, BatchError::UnscopedDelete { .. }));
    assert!(transport.calls().is_empty());
    assert_eq!(engine.metrics().snapshot().unscoped_deletes_rejected, 1);

    transport.push_reply(pgbulk::QueryOutput {
        rows: Vec::new(),
        rows_affected: 4,
    });
    let deleted = engine
        .delete(&DeleteRequest::new(people()).allow_full_table_delete(true))
        .await
        .context("gated delete")?;
    assert_eq!(deleted, 4);
    assert_eq!(transport.executed()[0].0, "DELETE FROM public.t");
    Ok(())
}

#[tokio::test]
async fn describe_attaches_labels_and_survives_label_failures() -> Result<()> {
    let transport = people_transport();
    let engine = BatchEngine::new(&transport);
    let schema = engine.describe_table(&people()).await?;
    let mood = schema.column("mood").context("mood column")?;
    assert_eq!(mood.enum_labels, vec!["sad", "ok", "happy"]);
    // built-in columns never trigger a label lookup
    let lookups = transport
        .calls()
        .into_iter()
        .filter(|call| matches!(call, Call::EnumLabels { .. }))
        .count();
    assert_eq!(lookups, 1);

    let failing = people_transport().failing_enum("mood");
    let engine = BatchEngine::new(&failing);
    let schema = engine.describe_table(&people()).await?;
    let mood = schema.column("mood").context("mood column")?;
    assert!(mood.enum_labels.is_empty());
    assert_eq!(engine.metrics().snapshot().enum_lookup_failures, 1);
    Ok(())
}

#[tokio::test]
async fn select_presentation_formats_dates() -> Result<()> {
    let transport = people_transport();
    let born = NaiveDate::from_ymd_opt(1990, 7, 4).context("date")?;
    transport.push_rows(vec![Record::new().with("id", 1).with("born", born)]);
    let engine = BatchEngine::new(&transport);

    let request = SelectRequest::new(people())
        .with_predicate("id = $1", [FieldValue::Int(1)])
        .presentation(true);
    let rows = engine.select_rows(&request).await?;
    assert_eq!(rows[0].get("born"), Some(&FieldValue::Text("1990-07-04".into())));
    assert_eq!(
        transport.executed()[0].0,
        "SELECT * FROM public.t WHERE id = $1"
    );
    Ok(())
}

#[tokio::test]
async fn select_without_presentation_keeps_wall_clock_time() -> Result<()> {
    let transport = people_transport();
    let seen_at = FixedOffset::west_opt(5 * 3600)
        .and_then(|tz| tz.with_ymd_and_hms(2023, 11, 5, 22, 15, 0).single())
        .context("timestamp")?;
    transport.push_rows(vec![Record::new().with("seen_at", seen_at)]);
    let engine = BatchEngine::new(&transport);

    let rows = engine
        .select_rows(&SelectRequest::new(people()).with_columns("seen_at"))
        .await?;
    match rows[0].get("seen_at") {
        Some(FieldValue::Timestamp(ts)) => {
            assert_eq!(ts.to_rfc3339(), "2023-11-05T22:15:00+00:00")
        }
        other => panic!("unexpected value: {other:?}"),
    }
    // no catalog lookup on the non-presentation path
    assert_eq!(transport.calls().len(), 1);
    Ok(())
}

#[tokio::test]
async fn quoted_identifiers_survive_rendering() -> Result<()> {
    let table = TableRef::new("Sales", "Order Items");
    let transport = common::RecordingTransport::new().with_table(
        table.clone(),
        &[
            ("OrderId", "bigint", "int8", "pg_catalog"),
            ("qty", "integer", "int4", "pg_catalog"),
        ],
    );
    let engine = BatchEngine::new(&transport);
    let records = vec![Record::new().with("OrderId", 9_i64).with("qty", 2)];
    engine.bulk_update_by_keys(&table, &records, &["OrderId"]).await?;

    let (sql, _) = &transport.executed()[0];
    assert_eq!(
        sql,
        "UPDATE \"Sales\".\"Order Items\" AS t SET qty = c.qty FROM (VALUES ($1::int8, $2::int4)) \
AS c(\"OrderId\", qty) WHERE c.\"OrderId\"::int8 = t.\"OrderId\""
    );
    Ok(())
}

//! Property-style coverage of the query-rewriting surfaces, exercised
//! through the public API.

use mssql_adapter::cursor::BufferedFeed;
use mssql_adapter::pagination::{fold_parens, has_main_order_by, rewrite};
use mssql_adapter::prelude::*;
use mssql_adapter::{MAX_PARAMETER_COUNT, emulate, infer_style, modify_collation};

#[test]
fn paren_folding_is_idempotent_and_preserves_outer_text() {
    let sql = "SELECT ROW_NUMBER() OVER(ORDER BY x) FROM t";
    let folded = fold_parens(sql);
    assert_eq!(folded, "SELECT ROW_NUMBER() OVER() FROM t");
    assert_eq!(fold_parens(&folded), folded);

    let nested = "SELECT a FROM (SELECT b FROM (SELECT c FROM t) x) y WHERE z = 1";
    let folded = fold_parens(nested);
    assert_eq!(folded, "SELECT a FROM () y WHERE z = 1");
    assert_eq!(fold_parens(&folded), folded);
}

#[test]
fn main_query_ordering_detection() {
    // ORDER BY only inside a subquery: no main-query ordering
    assert!(!has_main_order_by(
        "SELECT * FROM (SELECT TOP 3 id FROM t ORDER BY id DESC) q"
    ));
    // ORDER BY only inside a window clause: no main-query ordering
    assert!(!has_main_order_by(
        "SELECT RANK() OVER (ORDER BY score) FROM t"
    ));
    // ORDER BY after the closing subquery parenthesis: ordering present
    assert!(has_main_order_by(
        "SELECT * FROM (SELECT id FROM t ORDER BY id) q ORDER BY 1"
    ));
}

#[test]
fn pagination_is_a_no_op_without_bounds() {
    let params = ParamSet::positional(vec![SqlValue::Text("x".into())]);
    let (sql, out) = rewrite("SELECT id FROM t WHERE a = ?", params.clone(), 0, 0).unwrap();
    assert_eq!(sql, "SELECT id FROM t WHERE a = ?");
    assert_eq!(out, params);
}

#[test]
fn pagination_injects_one_ordering_and_one_offset_fetch_pair() {
    let (sql, params) = rewrite("SELECT id FROM t", ParamSet::None, 5, 10).unwrap();
    assert_eq!(sql.matches("ORDER BY 1").count(), 1);
    assert_eq!(sql.matches("OFFSET").count(), 1);
    assert_eq!(sql.matches("FETCH NEXT").count(), 1);
    assert_eq!(
        params,
        ParamSet::Positional(vec![SqlValue::Int(5), SqlValue::Int(10)])
    );
}

#[test]
fn emulation_round_trips_literal_values() {
    // over-ceiling parameter counts funnel through emulate(); the encoding
    // itself must substitute every marker and keep values recoverable
    let values: Vec<SqlValue> = (0..MAX_PARAMETER_COUNT + 1)
        .map(|i| SqlValue::Int(i as i64))
        .collect();
    let markers = vec!["?"; values.len()];
    let sql = format!("INSERT INTO t VALUES ({})", markers.join(","));
    let emulated = emulate(&sql, &values).unwrap();
    assert!(!emulated.contains('?'));
    assert_eq!(emulated.matches("2100").count(), 1);

    let emulated = emulate(
        "VALUES (?, ?, ?, ?)",
        &[
            SqlValue::Text("0099".into()),
            SqlValue::Null,
            SqlValue::Bool(true),
            SqlValue::Bool(false),
        ],
    )
    .unwrap();
    assert_eq!(emulated, "VALUES ('0099', NULL, 1, 0)");
}

#[test]
fn style_inference_matches_query_texture() {
    let positional = ParamSet::positional(vec![SqlValue::Int(1)]);
    assert_eq!(
        infer_style("WHERE a = ?", &positional).unwrap(),
        PlaceholderStyle::Positional
    );
    assert_eq!(
        infer_style("WHERE a = $1", &positional).unwrap(),
        PlaceholderStyle::DollarIndexed
    );
    let named = ParamSet::named(vec![("a".into(), SqlValue::Int(1))]);
    assert_eq!(
        infer_style("WHERE a = :a", &named).unwrap(),
        PlaceholderStyle::NamedColon
    );
}

#[test]
fn collation_toggles_are_self_inverse() {
    let base = "Latin1_General_CI_AI";
    let cs_once = modify_collation(base, true, true);
    let toggled_back = modify_collation(&modify_collation(base, false, true), true, true);
    assert_eq!(toggled_back, cs_once);
}

#[tokio::test]
async fn cursor_close_is_idempotent() {
    let feed = BufferedFeed::new(vec![vec![SqlValue::Int(1)], vec![SqlValue::Int(2)]]);
    let mut cursor = Cursor::detached(vec!["id".into()], Box::new(feed));

    let first = cursor.next_row().await.unwrap().unwrap();
    assert_eq!(first.get("id"), Some(&SqlValue::Int(1)));

    cursor.close().await;
    cursor.close().await; // second close is a no-op
    assert!(cursor.next_row().await.unwrap().is_none());
}

//! Universal invariants.

use std::collections::HashSet;

use funsql::node::scalar::Lit;
use funsql::{render, render_with, Dialect, Options, SQLCatalog, SQLTable, Scalar, Tabular};

/// Every quoted identifier immediately following an `AS ` keyword, in
/// left-to-right order.
fn aliases_in(sql: &str) -> Vec<String> {
    let marker = "AS \"";
    let mut out = Vec::new();
    let mut rest = sql;
    while let Some(idx) = rest.find(marker) {
        let after = &rest[idx + marker.len()..];
        if let Some(end) = after.find('"') {
            out.push(after[..end].to_string());
            rest = &after[end + 1..];
        } else {
            break;
        }
    }
    out
}

fn person_catalog() -> SQLCatalog {
    SQLCatalog::new(Dialect::Generic).with_table(SQLTable::new("person", vec!["person_id", "year_of_birth"]))
}

/// Property 1: literal round-trip for every `Lit` variant.
#[test]
fn literal_round_trip() {
    let catalog = person_catalog();
    let cases = vec![
        (Lit::Null, "NULL"),
        (Lit::Bool(true), "TRUE"),
        (Lit::Bool(false), "FALSE"),
        (Lit::Int(42), "42"),
        (Lit::Float("3.5".to_string()), "3.5"),
        (Lit::Text("it's fine".to_string()), "'it''s fine'"),
        (Lit::DateTime("2020-01-01".to_string()), "'2020-01-01'"),
    ];

    for (lit, expected) in cases {
        let query = Tabular::from_table("person").select(vec![(Some("v".to_string()), Scalar::lit(lit))]);
        let sql = render(&query, &catalog).unwrap();
        assert!(sql.raw.contains(expected), "{} did not contain {expected}", sql.raw);
    }
}

/// Property 2: every alias allocated is unique, and every internal alias
/// (a.k.a. anything that isn't the root SELECT's own column aliases) has
/// the `<name>_<k>` shape.
#[test]
fn aliases_are_unique_and_numbered() {
    let catalog = SQLCatalog::new(Dialect::Generic)
        .with_table(SQLTable::new("person", vec!["person_id", "location_id"]))
        .with_table(SQLTable::new("location", vec!["location_id", "state"]));

    let location = Tabular::from_table("location");
    let on = Scalar::fun(
        "=",
        vec![Scalar::get("location_id"), Scalar::get_from(&location, "location_id")],
    );
    let query = Tabular::from_table("person")
        .join(location, on, false, false)
        .select(vec![(None, Scalar::get("person_id"))]);

    let sql = render(&query, &catalog).unwrap();

    let mut seen = HashSet::new();
    for alias in aliases_in(&sql.raw) {
        assert!(seen.insert(alias.clone()), "alias {alias} reused: {}", sql.raw);
        let suffix = alias.rsplit('_').next().unwrap();
        assert!(
            !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()),
            "alias {alias} is not of the form <name>_<k>"
        );
    }
}

/// Property 4: a self-join `Iterate` compiles (the fixpoint loop over the
/// base row's fields terminates) rather than hanging or erroring out.
#[test]
fn iterate_fixpoint_terminates() {
    let catalog = SQLCatalog::new(Dialect::Generic).with_table(SQLTable::new("category", vec!["id", "parent_id"]));

    let base = Tabular::from_table("category");
    let other = Tabular::from_table("category");
    let on = Scalar::fun("=", vec![Scalar::get("parent_id"), Scalar::get_from(&other, "id")]);
    let step = Tabular::iterate_self().join(other, on, false, false);
    let query = base.iterate(step);

    let sql = render(&query, &catalog).unwrap();
    assert!(sql.raw.contains("WITH RECURSIVE"));
}

/// Property 5: reference completeness. A tree that threads a field through
/// several stacked boxes (`Where`, `Join`, `Select`) must compile without a
/// reference error, since Link is required to deliver every box's own refs
/// before Translate runs.
#[test]
fn reference_completeness_across_stacked_boxes() {
    let catalog = SQLCatalog::new(Dialect::Generic)
        .with_table(SQLTable::new("person", vec!["person_id", "year_of_birth", "location_id"]))
        .with_table(SQLTable::new("location", vec!["location_id", "state"]));

    let location = Tabular::from_table("location");
    let on = Scalar::fun(
        "=",
        vec![Scalar::get("location_id"), Scalar::get_from(&location, "location_id")],
    );
    let query = Tabular::from_table("person")
        .where_(Scalar::fun(">", vec![Scalar::get("year_of_birth"), Scalar::lit(Lit::Int(1900))]))
        .join(location, on, false, false)
        .select(vec![(None, Scalar::get("person_id"))]);

    assert!(render(&query, &catalog).is_ok());
}

/// Property 6: applying `Where` twice merges into one `WHERE` with an `AND`
/// of both conditions, rather than nesting or duplicating the clause.
#[test]
fn flatten_correctness_chained_where() {
    let catalog = person_catalog();
    let a = Scalar::fun(">", vec![Scalar::get("year_of_birth"), Scalar::lit(Lit::Int(2000))]);
    let b = Scalar::fun("<", vec![Scalar::get("year_of_birth"), Scalar::lit(Lit::Int(2020))]);
    let query = Tabular::from_table("person").where_(a).where_(b).select(vec![(None, Scalar::get("person_id"))]);

    let sql = render(&query, &catalog).unwrap();
    assert_eq!(sql.raw.matches("WHERE").count(), 1);
    assert_eq!(sql.raw.matches(" AND ").count(), 1);
}

/// Property 7: rendering the same tree twice (including through the cache)
/// produces byte-identical SQL.
#[test]
fn handle_idempotence() {
    let catalog = person_catalog();
    let query = Tabular::from_table("person")
        .where_(Scalar::fun(">", vec![Scalar::get("year_of_birth"), Scalar::lit(Lit::Int(2000))]))
        .select(vec![(None, Scalar::get("person_id"))]);

    let first = render(&query, &catalog).unwrap();
    let second = render(&query, &catalog).unwrap();
    assert_eq!(first.raw, second.raw);
    assert_eq!(first.vars, second.vars);
}

/// The render cache is keyed on the *effective* dialect of each call, not
/// just the catalog's own default: overriding the dialect via `Options`
/// must not let one call's cached entry leak into another call that
/// resolves to a different effective dialect.
#[test]
fn cache_key_respects_effective_dialect_override() {
    let catalog = SQLCatalog::new(Dialect::Postgres)
        .with_table(SQLTable::new("person", vec!["person_id", "year_of_birth"]))
        .with_cache(8);
    let query = Tabular::from_table("person")
        .where_(Scalar::fun("=", vec![Scalar::get("year_of_birth"), Scalar::var("yob")]))
        .select(vec![(None, Scalar::get("person_id"))]);

    let mysql_opts = Options { dialect: Some(Dialect::MySql) };
    let mysql_sql = render_with(&query, &catalog, &mysql_opts).unwrap();
    assert!(mysql_sql.raw.contains('?'));
    assert!(mysql_sql.raw.contains('`'));

    let postgres_sql = render(&query, &catalog).unwrap();
    assert!(postgres_sql.raw.contains("$1"));
    assert!(!postgres_sql.raw.contains('?'));

    let mysql_sql_again = render_with(&query, &catalog, &mysql_opts).unwrap();
    assert_eq!(mysql_sql.raw, mysql_sql_again.raw);
}

/// Property 8: `Append` branches expose the same ordered column-alias list,
/// since a `UNION ALL` requires aligned projections.
#[test]
fn union_alignment_for_append() {
    let catalog = SQLCatalog::new(Dialect::Generic)
        .with_table(SQLTable::new("person", vec!["person_id", "year_of_birth"]))
        .with_table(SQLTable::new("staged_person", vec!["person_id", "year_of_birth"]));

    let left = Tabular::from_table("person").select(vec![(None, Scalar::get("person_id")), (None, Scalar::get("year_of_birth"))]);
    let right =
        Tabular::from_table("staged_person").select(vec![(None, Scalar::get("person_id")), (None, Scalar::get("year_of_birth"))]);
    let query = left.append(vec![right]);

    let sql = render(&query, &catalog).unwrap();
    assert!(sql.raw.contains("UNION ALL"));

    let halves: Vec<&str> = sql.raw.splitn(2, "UNION ALL").collect();
    assert_eq!(halves.len(), 2);
    // Each branch's own SELECT list ends at its FROM; the column aliases
    // there are exactly "person_id" and "year_of_birth" on both sides.
    assert!(halves[0].contains("\"person_id\"") && halves[0].contains("\"year_of_birth\""));
    assert!(halves[1].contains("\"person_id\"") && halves[1].contains("\"year_of_birth\""));
}

//! End-to-end scenario tests mirroring the six worked examples.

use std::rc::Rc;

use pretty_assertions::assert_eq;

use funsql::node::scalar::Lit;
use funsql::node::{Agg, Over as ScalarOver};
use funsql::{render, Dialect, SQLCatalog, SQLTable, Scalar, Tabular};

fn person_catalog() -> SQLCatalog {
    SQLCatalog::new(Dialect::Generic).with_table(SQLTable::new("person", vec!["person_id", "year_of_birth"]))
}

#[test]
fn scenario_1_plain_select() {
    let catalog = person_catalog();
    let query = Tabular::from_table("person").select(vec![
        (None, Scalar::get("person_id")),
        (None, Scalar::get("year_of_birth")),
    ]);

    let sql = render(&query, &catalog).unwrap();
    assert_eq!(
        sql.raw,
        r#"SELECT "person_1"."person_id", "person_1"."year_of_birth" FROM "person" AS "person_1""#
    );
    assert!(sql.vars.is_empty());
}

#[test]
fn scenario_2_select_with_filter() {
    let catalog = person_catalog();
    let query = Tabular::from_table("person")
        .where_(Scalar::fun(">", vec![Scalar::get("year_of_birth"), Scalar::lit(Lit::Int(2000))]))
        .select(vec![(None, Scalar::get("person_id")), (None, Scalar::get("year_of_birth"))]);

    let sql = render(&query, &catalog).unwrap();
    assert_eq!(
        sql.raw,
        r#"SELECT "person_1"."person_id", "person_1"."year_of_birth" FROM "person" AS "person_1" WHERE ("person_1"."year_of_birth" > 2000)"#
    );
}

#[test]
fn scenario_3_chained_where_merges_into_one_and() {
    let catalog = person_catalog();
    let a = Scalar::fun(">", vec![Scalar::get("year_of_birth"), Scalar::lit(Lit::Int(2000))]);
    let b = Scalar::fun("<", vec![Scalar::get("year_of_birth"), Scalar::lit(Lit::Int(2020))]);
    let query = Tabular::from_table("person")
        .where_(a)
        .where_(b)
        .select(vec![(None, Scalar::get("person_id"))]);

    let sql = render(&query, &catalog).unwrap();
    assert_eq!(
        sql.raw,
        r#"SELECT "person_1"."person_id" FROM "person" AS "person_1" WHERE (("person_1"."year_of_birth" > 2000) AND ("person_1"."year_of_birth" < 2020))"#
    );
}

/// A join against a grouped subquery, with an aggregate scoped to the
/// joined-and-grouped side via `Agg.over`. Structural assertions only: the
/// exact aliasing of the nested subquery isn't part of the contract.
#[test]
fn scenario_4_join_with_grouped_aggregate() {
    let catalog = SQLCatalog::new(Dialect::Generic)
        .with_table(SQLTable::new("person", vec!["person_id", "location_id"]))
        .with_table(SQLTable::new("location", vec!["location_id"]))
        .with_table(SQLTable::new("visit", vec!["person_id", "visit_start_date"]));

    let visit_grouped = Tabular::from_table("visit").group(
        vec![(None, Scalar::get("person_id"))],
        None,
    );

    let on = Scalar::fun(
        "=",
        vec![Scalar::get("person_id"), Scalar::get_from(&visit_grouped, "person_id")],
    );

    let max_dt = Rc::new(Scalar::Agg(Agg {
        name: "max".to_string(),
        args: vec![Scalar::get("visit_start_date")],
        filter: None,
        distinct: false,
        over: ScalarOver::Tabular(visit_grouped.clone()),
    }));

    let query = Tabular::from_table("person")
        .where_(Scalar::fun(">", vec![Scalar::get("location_id"), Scalar::lit(Lit::Int(0))]))
        .join(visit_grouped, on, true, false)
        .select(vec![(None, Scalar::get("person_id")), (Some("max_dt".to_string()), max_dt)]);

    let sql = render(&query, &catalog).unwrap();
    assert!(sql.raw.starts_with("SELECT"));
    assert!(sql.raw.contains("LEFT JOIN"));
    assert!(sql.raw.contains("GROUP BY"));
    assert!(sql.raw.contains("MAX("));
    assert!(sql.raw.contains("AS \"max_dt\""));
}

#[test]
fn scenario_5_var_placeholder_numbered_reuse_on_postgres() {
    let catalog = SQLCatalog::new(Dialect::Postgres)
        .with_table(SQLTable::new("person", vec!["person_id", "year_of_birth"]));

    let query = Tabular::from_table("person")
        .where_(Scalar::fun(
            "=",
            vec![Scalar::get("year_of_birth"), Scalar::var("min_year")],
        ))
        .select(vec![(None, Scalar::get("person_id"))]);

    let sql = render(&query, &catalog).unwrap();
    assert_eq!(sql.vars, vec!["min_year".to_string()]);
    assert!(sql.raw.contains("$1"));
    assert!(!sql.raw.contains("$2"));
}

#[test]
fn scenario_5_var_placeholder_repeated_reuses_slot_on_postgres_but_not_mysql() {
    let make = |dialect: Dialect| {
        let catalog = SQLCatalog::new(dialect).with_table(SQLTable::new("person", vec!["person_id", "year_of_birth"]));
        let cond = Scalar::fun(
            "and",
            vec![
                Scalar::fun(">", vec![Scalar::get("year_of_birth"), Scalar::var("yob")]),
                Scalar::fun("<", vec![Scalar::get("year_of_birth"), Scalar::var("yob")]),
            ],
        );
        let query = Tabular::from_table("person").where_(cond).select(vec![(None, Scalar::get("person_id"))]);
        render(&query, &catalog).unwrap()
    };

    let pg = make(Dialect::Postgres);
    assert_eq!(pg.vars, vec!["yob".to_string()]);
    assert!(pg.raw.contains("$1"));
    assert!(!pg.raw.contains("$2"));

    let my = make(Dialect::MySql);
    assert_eq!(my.vars, vec!["yob".to_string(), "yob".to_string()]);
    assert_eq!(my.raw.matches('?').count(), 2);
    assert!(my.raw.contains('`'));
}

/// A plain (non-recursive) CTE: the definition must still render its own
/// projected columns even though nothing inside its own subtree requests
/// them by name.
#[test]
fn scenario_7_plain_cte_renders_its_own_columns() {
    let catalog = person_catalog();
    let cte_def = Tabular::from_table("person")
        .where_(Scalar::fun(">", vec![Scalar::get("year_of_birth"), Scalar::lit(Lit::Int(2000))]));

    let body = Tabular::from_symbol("active_person").select(vec![(None, Scalar::get("person_id"))]);

    let query = body.with(vec![("active_person".to_string(), cte_def)], None);

    let sql = render(&query, &catalog).unwrap();
    assert!(sql.raw.starts_with("WITH \"active_person\" AS ("));
    assert!(!sql.raw.contains("AS (SELECT  FROM"), "CTE body must not render an empty column list: {}", sql.raw);
    assert!(sql.raw.contains("\"person_id\""));
    assert!(sql.raw.contains("\"year_of_birth\""));
}

/// `WITH RECURSIVE`: the base case reads a plain table, the recursive step
/// self-joins through `iterate_self`. Structural assertions only, since the
/// exact CTE alias naming isn't part of the contract.
#[test]
fn scenario_6_recursive_iterate() {
    let catalog = SQLCatalog::new(Dialect::Generic).with_table(SQLTable::new("category", vec!["id", "parent_id"]));

    let base = Tabular::from_table("category").select(vec![(None, Scalar::get("id")), (None, Scalar::get("parent_id"))]);

    let other = Tabular::from_table("category");
    let on = Scalar::fun(
        "=",
        vec![Scalar::get("parent_id"), Scalar::get_from(&other, "id")],
    );
    let step = Tabular::iterate_self()
        .join(other, on, false, false)
        .select(vec![(None, Scalar::get("id")), (None, Scalar::get("parent_id"))]);

    let query = base.iterate(step);

    let sql = render(&query, &catalog).unwrap();
    assert!(sql.raw.starts_with("WITH RECURSIVE"));
    assert!(sql.raw.contains("UNION ALL"));
    assert!(sql.raw.contains(r#"FROM "category""#));
}

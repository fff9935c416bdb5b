//! Minimal end-to-end demo: builds a filtered `person` query, compiles it
//! against a small in-memory catalog, and prints the SQL. Pass a dialect
//! name as the first argument (`generic`, `postgres`, `mysql`, `sqlite`,
//! `mssql`) to override the default.

use std::str::FromStr;

use funsql::node::scalar::Lit;
use funsql::{render, Dialect, SQLCatalog, SQLTable, Scalar, Tabular};
use strum::VariantNames;

fn main() {
    let dialect = match std::env::args().nth(1) {
        None => Dialect::Postgres,
        Some(name) => match Dialect::from_str(&name) {
            Ok(d) => d,
            Err(_) => {
                eprintln!("unknown dialect `{name}`, expected one of: {}", Dialect::VARIANTS.join(", "));
                std::process::exit(1);
            }
        },
    };

    let catalog =
        SQLCatalog::new(dialect).with_table(SQLTable::new("person", vec!["person_id", "year_of_birth"]));

    let query = Tabular::from_table("person").where_(Scalar::fun(
        ">",
        vec![Scalar::get("year_of_birth"), Scalar::lit(Lit::Int(2000))],
    ));

    match render(&query, &catalog) {
        Ok(sql) => {
            println!("{}", sql.raw);
            if !sql.vars.is_empty() {
                println!("-- vars: {:?}", sql.vars);
            }
        }
        Err(e) => eprintln!("compile error: {e}"),
    }
}

//! OpenAPI Specification Generator Binary
//!
//! Prints the counterbalance OpenAPI specification as JSON to stdout.
//!
//! Usage:
//!   cargo run -p counterbalance-api --bin generate-openapi --features openapi > openapi.json

use counterbalance_api::ApiDoc;

fn main() {
    match ApiDoc::to_json() {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Failed to serialize OpenAPI spec: {}", e);
            std::process::exit(1);
        }
    }
}

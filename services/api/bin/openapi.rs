//! Writes the service's OpenAPI document, by default to `openapi.json`.

use utoipa::OpenApi;
use voice_agent_api::router::ApiDoc;

fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "openapi.json".to_string());
    let document = ApiDoc::openapi().to_pretty_json()?;
    std::fs::write(&path, document)?;
    println!("Wrote OpenAPI document to {}", path);
    Ok(())
}

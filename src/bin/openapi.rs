use anyhow::Result;

// Print the OpenAPI document so it can be committed or fed to client generators.
fn main() -> Result<()> {
    let doc = snippetbox::api::openapi();
    println!("{}", serde_json::to_string_pretty(&doc)?);
    Ok(())
}

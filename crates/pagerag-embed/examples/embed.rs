use pagerag_core::config::Config;
use pagerag_embed::get_default_embedder;

fn main() -> anyhow::Result<()> {
    let settings = Config::load()?.settings()?;
    let embedder = get_default_embedder(&settings.embed)?;
    let queries = vec!["quarterly revenue table".to_string(), "wiring diagram".to_string()];
    let embs = embedder.embed_queries(&queries)?;
    for (q, e) in queries.iter().zip(&embs) {
        println!("{q:?}: {} sub-vectors x {}", e.len(), embedder.dim());
    }
    Ok(())
}

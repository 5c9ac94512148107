use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use school_rag::utils::load_records;
use school_rag::{
    BundleSource, RagConfig, RagError, Retriever, format_retrieved_context, merge_records,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("school_rag=info")),
        )
        .with_target(false)
        .init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = RagConfig::load(config_path.as_deref()).context("Failed to load configuration")?;

    let provider = config
        .embedding
        .provider()
        .context("Failed to set up embedding provider")?;
    let mut retriever: Retriever<_> = Retriever::new(provider);

    let source = retriever.load_or_build(&config.bundle_prefix, || {
        let schools = load_records(&config.schools_path)
            .map_err(|e| RagError::SourceData(format!("{e:#}")))?;
        let programs = load_records(&config.programs_path)
            .map_err(|e| RagError::SourceData(format!("{e:#}")))?;
        Ok(merge_records(&schools, &programs, &config.columns))
    })?;
    match source {
        BundleSource::Loaded => info!("using saved index at {}", config.bundle_prefix.display()),
        BundleSource::Rebuilt => info!("index rebuilt from source records"),
    }

    println!(
        "{} schools indexed. Enter your questions (Ctrl+D to exit)",
        retriever.documents().len()
    );

    loop {
        let mut query = String::new();
        print!("> ");
        std::io::stdout().flush()?;

        if std::io::stdin().read_line(&mut query)? == 0 {
            break;
        }

        let query = query.trim();
        if query.is_empty() {
            continue;
        }

        let scored = match retriever.retrieve_scored(query, config.top_k) {
            Ok(scored) => scored,
            Err(e) => {
                eprintln!("Error: {e}\n");
                continue;
            }
        };

        println!(
            "\n{}",
            format_retrieved_context(scored.iter().map(|s| s.document))
        );
        for (i, hit) in scored.iter().enumerate() {
            let meta = &hit.document.metadata;
            println!("{}. {} (distance {:.4})", i + 1, hit.document.name, hit.distance);
            println!("   Neighborhood: {}", or_unknown(&meta.neighborhood));
            println!("   Grades: {}", or_unknown(&meta.grades));
            println!("   Programs: {}", meta.programs.join(", "));
        }
        println!();
    }

    Ok(())
}

fn or_unknown(value: &str) -> &str {
    if value.is_empty() { "Unknown" } else { value }
}

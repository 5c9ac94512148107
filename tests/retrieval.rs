use std::fs;

use school_rag::utils::load_records;
use school_rag::{
    Bundle, BundlePaths, BundleSource, EmbeddingProvider, FlatIndex, HashingEmbedder,
    MergeColumns, RagError, Result, Retriever, format_retrieved_context, merge_records,
};
use tempfile::tempdir;

const SCHOOLS: &str = r#"[
  {"School Name": "Hernandez K-8", "School Type": "K-8", "Grades Served": "K0-8",
   "Address": "61 School St, Roxbury, MA 02119", "Phone Number": "617-635-8187"},
  {"School Name": "Curley K-8", "School Type": "K-8", "Grades Served": "K1-8",
   "Address": "40 Pershing Rd, Jamaica Plain, MA 02130", "Email Address": "curley@bostonpublicschools.org"},
  {"School Name": "Boston Latin Academy", "School Type": "Exam", "Grades Served": "7-12",
   "Address": "205 Townsend St, Dorchester, MA 02121"},
  {"School Name": "Mystery School"}
]"#;

const PROGRAMS: &str = r#"[
  {"School Name": "Hernandez K-8", "dual_language_spanish": "Yes", "advanced_work": "No"},
  {"School Name": "Curley K-8", "dual_language_spanish": "No", "before_school_care": "yes"},
  {"School Name": "Boston Latin Academy", "stem_focus": "Yes", "advanced_work": "Yes"}
]"#;

fn merged_documents() -> anyhow::Result<Vec<school_rag::Document>> {
    let dir = tempdir()?;
    let schools = dir.path().join("schools.json");
    let programs = dir.path().join("programs.json");
    fs::write(&schools, SCHOOLS)?;
    fs::write(&programs, PROGRAMS)?;

    Ok(merge_records(
        &load_records(&schools)?,
        &load_records(&programs)?,
        &MergeColumns::default(),
    ))
}

struct GridEmbedder;

impl EmbeddingProvider for GridEmbedder {
    fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts
            .iter()
            .map(|t| match t.as_str() {
                "p0" => Ok(vec![0.0, 0.0]),
                "p1" => Ok(vec![1.0, 0.0]),
                "p2" => Ok(vec![2.0, 0.0]),
                "p3" => Ok(vec![5.0, 5.0]),
                "p4" => Ok(vec![10.0, 10.0]),
                "query" => Ok(vec![1.0, 1.0]),
                other => Err(RagError::EmbeddingProvider(format!("no vector for {other}"))),
            })
            .collect()
    }
}

fn grid_documents() -> Vec<school_rag::Document> {
    ["p0", "p1", "p2", "p3", "p4"]
        .iter()
        .map(|c| school_rag::Document {
            name: c.to_string(),
            content: c.to_string(),
            metadata: Default::default(),
        })
        .collect()
}

#[test]
fn merged_corpus_builds_one_row_per_document() -> anyhow::Result<()> {
    let documents = merged_documents()?;
    assert_eq!(documents.len(), 4);

    let mut retriever: Retriever<_> = Retriever::new(HashingEmbedder::new(256));
    retriever.build(documents.clone())?;

    let bundle = retriever.bundle().expect("bundle after build");
    assert_eq!(bundle.embeddings().nrows(), documents.len());
    assert_eq!(bundle.documents(), documents.as_slice());
    Ok(())
}

#[test]
fn retrieval_prefers_matching_program() -> anyhow::Result<()> {
    let mut retriever: Retriever<_> = Retriever::new(HashingEmbedder::new(512));
    retriever.build(merged_documents()?)?;

    let hits = retriever.retrieve("Exam school with Stem Focus and Advanced Work", 1)?;
    assert_eq!(hits[0].name, "Boston Latin Academy");

    let all = retriever.retrieve_scored("Exam school with Stem Focus", 10)?;
    assert_eq!(all.len(), 4);
    assert!(all.windows(2).all(|w| w[0].distance <= w[1].distance));
    Ok(())
}

#[test]
fn concrete_grid_scenario() -> anyhow::Result<()> {
    let mut retriever: Retriever<_> = Retriever::new(GridEmbedder);
    retriever.build(grid_documents())?;

    let names: Vec<&str> = retriever
        .retrieve("query", 3)?
        .iter()
        .map(|d| d.name.as_str())
        .collect();
    assert_eq!(names, vec!["p1", "p0", "p2"]);

    assert!(retriever.retrieve("query", 0)?.is_empty());
    assert_eq!(retriever.retrieve("query", 7)?.len(), 5);
    Ok(())
}

#[test]
fn save_load_round_trip_reproduces_results() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let prefix = dir.path().join("index").join("bps");
    let documents = merged_documents()?;

    let mut saved: Retriever<_> = Retriever::new(HashingEmbedder::new(128));
    saved.build(documents)?;
    saved.save(&prefix)?;

    let mut reloaded: Retriever<_> = Retriever::new(HashingEmbedder::new(128));
    reloaded.load(&prefix)?;

    let a = saved.bundle().expect("saved bundle");
    let b = reloaded.bundle().expect("reloaded bundle");
    assert_eq!(a.documents(), b.documents());
    for (x, y) in a.embeddings().iter().zip(b.embeddings().iter()) {
        assert!((x - y).abs() < 1e-6);
    }

    for query in ["spanish in Roxbury", "before school care", "grades 7-12"] {
        assert_eq!(saved.retrieve(query, 3)?, reloaded.retrieve(query, 3)?);
    }
    Ok(())
}

#[test]
fn independent_builds_rank_identically() -> anyhow::Result<()> {
    let mut first: Retriever<_> = Retriever::new(HashingEmbedder::new(64));
    let mut second: Retriever<_> = Retriever::new(HashingEmbedder::new(64));
    first.build(merged_documents()?)?;
    second.build(merged_documents()?)?;

    let query = "kindergarten in Jamaica Plain";
    assert_eq!(first.retrieve(query, 4)?, second.retrieve(query, 4)?);
    Ok(())
}

#[test]
fn corrupt_bundle_triggers_rebuild() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let prefix = dir.path().join("bps");

    let mut retriever: Retriever<_> = Retriever::new(GridEmbedder);
    retriever.build(grid_documents())?;
    retriever.save(&prefix)?;

    let paths = BundlePaths::new::<FlatIndex>(&prefix);
    fs::write(&paths.index, "{}")?;
    assert!(matches!(
        Bundle::<FlatIndex>::load(&prefix),
        Err(RagError::BundleCorrupt(_))
    ));

    let mut fresh: Retriever<_> = Retriever::new(GridEmbedder);
    let source = fresh.load_or_build(&prefix, || Ok(grid_documents()))?;
    assert_eq!(source, BundleSource::Rebuilt);
    assert!(Bundle::<FlatIndex>::load(&prefix).is_ok());
    Ok(())
}

#[test]
fn context_block_lists_only_present_contacts() -> anyhow::Result<()> {
    let documents = merged_documents()?;
    let context = format_retrieved_context(&documents[..2]);

    let lines: Vec<&str> = context.lines().collect();
    assert_eq!(lines[0], "# RETRIEVED_SCHOOLS");
    assert!(lines[1].starts_with("1. Hernandez K-8 is a K-8 school serving grades K0-8."));
    assert_eq!(lines[2], "   Phone: 617-635-8187");
    assert!(lines[3].starts_with("2. Curley K-8"));
    assert_eq!(lines[4], "   Email: curley@bostonpublicschools.org");
    assert_eq!(lines.len(), 5);
    Ok(())
}

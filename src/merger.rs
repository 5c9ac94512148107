//! Left join of primary school records with auxiliary program flags.

use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use unicode_normalization::UnicodeNormalization;

use crate::address::parse_address;
use crate::document::{Document, DocumentMetadata};
use crate::utils::readable_label;

/// One source row, column name to raw value, in source column order.
pub type Record = IndexMap<String, String>;

pub const PLACEHOLDER: &str = "N/A";

const TRUTHY: [&str; 6] = ["yes", "y", "true", "t", "1", "x"];

/// Column names the merger reads from the primary records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MergeColumns {
    pub name: String,
    pub school_type: String,
    pub grades: String,
    pub address: String,
    pub phone: String,
    pub email: String,
}

impl Default for MergeColumns {
    fn default() -> Self {
        Self {
            name: "School Name".to_string(),
            school_type: "School Type".to_string(),
            grades: "Grades Served".to_string(),
            address: "Address".to_string(),
            phone: "Phone Number".to_string(),
            email: "Email Address".to_string(),
        }
    }
}

fn join_key(name: &str) -> String {
    name.trim().nfc().collect()
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    TRUTHY.iter().any(|t| value.eq_ignore_ascii_case(t))
}

fn non_empty(record: &Record, column: &str) -> Option<String> {
    record
        .get(column)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Produces exactly one document per primary record.
///
/// Auxiliary rows are matched by name; a primary row without a match simply
/// has no programs. Duplicate primary names are kept as distinct documents.
pub fn merge_records(
    primary: &[Record],
    auxiliary: &[Record],
    columns: &MergeColumns,
) -> Vec<Document> {
    let mut flags_by_name: FxHashMap<String, &Record> = FxHashMap::default();
    for record in auxiliary {
        let Some(name) = non_empty(record, &columns.name) else {
            warn!("auxiliary record without {:?} ignored", columns.name);
            continue;
        };
        let key = join_key(&name);
        if flags_by_name.contains_key(&key) {
            warn!(school = %name, "duplicate auxiliary record ignored");
            continue;
        }
        flags_by_name.insert(key, record);
    }

    let documents: Vec<Document> = primary
        .iter()
        .map(|record| {
            let flags = non_empty(record, &columns.name)
                .and_then(|name| flags_by_name.get(&join_key(&name)).copied());
            build_document(record, flags, columns)
        })
        .collect();

    debug!(
        primary = primary.len(),
        auxiliary = auxiliary.len(),
        documents = documents.len(),
        "merged school records"
    );
    documents
}

fn build_document(record: &Record, flags: Option<&Record>, columns: &MergeColumns) -> Document {
    let name = non_empty(record, &columns.name).unwrap_or_else(|| {
        warn!("primary record without {:?}, using placeholder", columns.name);
        PLACEHOLDER.to_string()
    });
    let school_type =
        non_empty(record, &columns.school_type).unwrap_or_else(|| PLACEHOLDER.to_string());
    let grades = non_empty(record, &columns.grades).unwrap_or_else(|| PLACEHOLDER.to_string());
    let address = non_empty(record, &columns.address).unwrap_or_default();
    let parts = parse_address(&address);

    let programs: Vec<String> = flags
        .map(|flags| {
            flags
                .iter()
                .filter(|(column, value)| **column != columns.name && is_truthy(value))
                .map(|(column, _)| column.clone())
                .collect()
        })
        .unwrap_or_default();

    let mut content = format!("{name} is a {school_type} school serving grades {grades}.");
    if !address.is_empty() {
        content.push_str(&format!(" Located at {address}."));
    }
    if !programs.is_empty() {
        let readable: Vec<String> = programs.iter().map(|p| readable_label(p)).collect();
        content.push_str(&format!(" Special programs include: {}.", readable.join(", ")));
    }

    Document {
        name,
        content,
        metadata: DocumentMetadata {
            grades,
            school_type,
            address,
            zip_code: parts.zip_code,
            neighborhood: parts.neighborhood,
            programs,
            phone: non_empty(record, &columns.phone),
            email: non_empty(record, &columns.email),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> Record {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_left_join_builds_content_and_metadata() {
        let primary = vec![record(&[
            ("School Name", "Hernandez K-8"),
            ("School Type", "K-8"),
            ("Grades Served", "K0-8"),
            ("Address", "61 School St, Roxbury, MA 02119"),
            ("Phone Number", "617-635-8187"),
        ])];
        let auxiliary = vec![record(&[
            ("School Name", "Hernandez K-8"),
            ("dual_language", "Yes"),
            ("advanced_work", "No"),
            ("before_school", "YES"),
        ])];

        let docs = merge_records(&primary, &auxiliary, &MergeColumns::default());
        assert_eq!(docs.len(), 1);
        let doc = &docs[0];
        assert_eq!(
            doc.content,
            "Hernandez K-8 is a K-8 school serving grades K0-8. \
             Located at 61 School St, Roxbury, MA 02119. \
             Special programs include: Dual Language, Before School."
        );
        assert_eq!(doc.metadata.programs, vec!["dual_language", "before_school"]);
        assert_eq!(doc.metadata.zip_code, "02119");
        assert_eq!(doc.metadata.neighborhood, "Roxbury");
        assert_eq!(doc.metadata.phone.as_deref(), Some("617-635-8187"));
        assert_eq!(doc.metadata.email, None);
    }

    #[test]
    fn test_unmatched_and_sparse_rows_use_placeholders() {
        let primary = vec![record(&[("School Name", "Mystery Academy")])];
        let docs = merge_records(&primary, &[], &MergeColumns::default());

        assert_eq!(docs.len(), 1);
        assert_eq!(
            docs[0].content,
            "Mystery Academy is a N/A school serving grades N/A."
        );
        assert_eq!(docs[0].metadata.grades, PLACEHOLDER);
        assert_eq!(docs[0].metadata.address, "");
        assert_eq!(docs[0].metadata.zip_code, "");
        assert!(docs[0].metadata.programs.is_empty());
    }

    #[test]
    fn test_duplicate_names_are_preserved() {
        let row = record(&[("School Name", "Twin School"), ("School Type", "Elementary")]);
        let primary = vec![row.clone(), row];
        let auxiliary = vec![
            record(&[("School Name", "Twin School"), ("stem", "yes")]),
            record(&[("School Name", "Twin School"), ("arts", "yes")]),
        ];

        let docs = merge_records(&primary, &auxiliary, &MergeColumns::default());
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0], docs[1]);
        assert_eq!(docs[0].metadata.programs, vec!["stem"]);
    }

    #[test]
    fn test_join_key_ignores_whitespace_and_normalization() {
        let primary = vec![record(&[("School Name", "Jos\u{e9} Mart\u{ed}")])];
        let auxiliary = vec![record(&[
            ("School Name", "  Jose\u{301} Marti\u{301} "),
            ("spanish", "true"),
        ])];

        let docs = merge_records(&primary, &auxiliary, &MergeColumns::default());
        assert_eq!(docs[0].metadata.programs, vec!["spanish"]);
    }

    #[test]
    fn test_missing_name_gets_placeholder() {
        let primary = vec![record(&[("School Type", "High")])];
        let docs = merge_records(&primary, &[], &MergeColumns::default());
        assert_eq!(docs[0].name, PLACEHOLDER);
    }

    #[test]
    fn test_truthy_values() {
        for value in ["Yes", " yes ", "TRUE", "1", "x", "Y"] {
            assert!(is_truthy(value), "{value:?} should be truthy");
        }
        for value in ["No", "", "0", "false", "maybe"] {
            assert!(!is_truthy(value), "{value:?} should not be truthy");
        }
    }
}

use std::fs;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::{ConformanceCase, YdToolError, CONFORMANCE_SCHEMA_V1};

/// Every `.json` file under `root`, sorted by path.
pub fn discover_cases(root: &Path) -> Result<Vec<PathBuf>, YdToolError> {
    let mut cases = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect::<Vec<_>>();
    cases.sort();

    if cases.is_empty() {
        return Err(YdToolError::CasesEmpty {
            path: root.to_path_buf(),
        });
    }
    Ok(cases)
}

pub fn read_case(case_path: &Path) -> Result<ConformanceCase, YdToolError> {
    let raw = fs::read_to_string(case_path).map_err(|source| YdToolError::ReadFile {
        path: case_path.to_path_buf(),
        source,
    })?;
    let parsed: ConformanceCase =
        serde_json::from_str(&raw).map_err(|source| YdToolError::ParseCase {
            path: case_path.to_path_buf(),
            source,
        })?;

    if parsed.schema_version != CONFORMANCE_SCHEMA_V1 {
        return Err(YdToolError::InvalidSchemaVersion {
            expected: CONFORMANCE_SCHEMA_V1.to_string(),
            found: parsed.schema_version,
        });
    }

    Ok(parsed)
}

#[cfg(test)]
mod source_tests {
    use super::*;

    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_dir(name: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("time should be monotonic")
            .as_nanos();
        let path = std::env::temp_dir().join(format!("yd-tool-{}-{}", name, nanos));
        fs::create_dir_all(&path).expect("dir should be created");
        path
    }

    #[test]
    fn discover_cases_finds_nested_json_sorted() {
        let root = temp_dir("discover");
        fs::create_dir_all(root.join("b")).expect("nested dir");
        fs::write(root.join("b").join("2.json"), "{}").expect("write");
        fs::write(root.join("a.json"), "{}").expect("write");
        fs::write(root.join("notes.txt"), "x").expect("write");

        let cases = discover_cases(&root).expect("cases should be found");
        assert_eq!(cases, vec![root.join("a.json"), root.join("b").join("2.json")]);
    }

    #[test]
    fn discover_cases_rejects_empty_dir() {
        let root = temp_dir("empty");
        let error = discover_cases(&root).expect_err("empty dir should fail");
        assert!(matches!(error, YdToolError::CasesEmpty { .. }));
    }

    #[test]
    fn read_case_checks_schema_version() {
        let root = temp_dir("schema");
        let path = root.join("case.json");
        fs::write(
            &path,
            r#"{"schemaVersion": "other.v0", "check": {"kind": "interpolate", "value": 1}}"#,
        )
        .expect("write");
        let error = read_case(&path).expect_err("schema should be rejected");
        assert!(matches!(error, YdToolError::InvalidSchemaVersion { .. }));

        fs::write(&path, "{").expect("write");
        let error = read_case(&path).expect_err("parse should fail");
        assert!(matches!(error, YdToolError::ParseCase { .. }));

        let error = read_case(&root.join("missing.json")).expect_err("read should fail");
        assert!(matches!(error, YdToolError::ReadFile { .. }));
    }
}

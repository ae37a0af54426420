//! The nested run document uploaded to the collector.
//!
//! The collector stores results as a tree:
//!
//! ```text
//! RunDocument (queueTaskId, target*, testDateTime)
//! └── SuiteResult  "suite"
//!     └── TestResult  "class"
//!         └── ClassResult  "case"
//!             └── CaseResult
//! ```
//!
//! Field names and the single-element list encoding of the case's names
//! follow the collector's JSON schema. Absent optional values are omitted.

use serde::Serialize;

use super::ResultRecord;
use crate::config::RunMetadata;

/// Root of the uploaded tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunDocument {
    pub queue_task_id: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_application: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_project_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_date_time: Option<String>,
    pub suite: Vec<SuiteResult>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SuiteResult {
    pub name: String,
    #[serde(rename = "suite")]
    pub tests: Vec<TestResult>,
    pub alias: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestResult {
    pub name: String,
    #[serde(rename = "class")]
    pub classes: Vec<ClassResult>,
    pub alias: &'static str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassResult {
    pub name: String,
    #[serde(rename = "case")]
    pub cases: Vec<CaseResult>,
    pub alias: &'static str,
}

/// Leaf entry for one test case.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseResult {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suite_name: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub test_name: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<Vec<String>>,
    pub duration: u64,
    pub test_log: Vec<String>,
    pub is_configuration: bool,
    pub status: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bug: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_result: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date_time: Option<String>,
    /// Version of the software under test.
    pub version: String,
}

/// Returns the first matching group, appending a new one when none matches.
fn entry<T>(
    groups: &mut Vec<T>,
    matches: impl Fn(&T) -> bool,
    create: impl FnOnce() -> T,
) -> &mut T {
    let idx = match groups.iter().position(matches) {
        Some(idx) => idx,
        None => {
            groups.push(create());
            groups.len() - 1
        }
    };
    &mut groups[idx]
}

fn listed(value: Option<&str>) -> Option<Vec<String>> {
    value.map(|v| vec![v.to_string()])
}

impl From<&ResultRecord> for CaseResult {
    fn from(record: &ResultRecord) -> Self {
        Self {
            name: record.case_name().to_string(),
            suite_name: listed(record.suite_name()),
            test_name: listed(record.test_name()),
            class_name: listed(record.class_name()),
            duration: record.duration_ms(),
            test_log: record.outputs().to_vec(),
            is_configuration: record.is_configuration(),
            status: record.status().code(),
            bug: listed(record.bug()),
            description: listed(record.case_description()),
            expected_result: listed(record.expected_result()),
            date_time: record.date_time().map(String::from),
            version: record.version().to_string(),
        }
    }
}

impl RunDocument {
    /// Wraps a single record, one entry per level.
    pub fn for_record(record: &ResultRecord, run: &RunMetadata, queue_task_id: u64) -> Self {
        Self::from_records(std::slice::from_ref(record), run, queue_task_id)
    }

    /// Groups records by suite, test and class.
    ///
    /// Groups appear in the order their first record appears; records keep
    /// their relative order inside a class. The document's test date-time is
    /// taken from the first record.
    pub fn from_records(records: &[ResultRecord], run: &RunMetadata, queue_task_id: u64) -> Self {
        let mut suites: Vec<SuiteResult> = Vec::new();

        for record in records {
            let suite_name = record.suite_name().unwrap_or_default();
            let test_name = record.test_name().unwrap_or_default();
            let class_name = record.class_name().unwrap_or_default();

            let suite = entry(
                &mut suites,
                |s| s.name == suite_name,
                || SuiteResult {
                    name: suite_name.to_string(),
                    tests: Vec::new(),
                    alias: "Suite",
                },
            );
            let test = entry(
                &mut suite.tests,
                |t| t.name == test_name,
                || TestResult {
                    name: test_name.to_string(),
                    classes: Vec::new(),
                    alias: "Test",
                },
            );
            let class = entry(
                &mut test.classes,
                |c| c.name == class_name,
                || ClassResult {
                    name: class_name.to_string(),
                    cases: Vec::new(),
                    alias: "Class",
                },
            );

            class.cases.push(CaseResult::from(record));
        }

        Self {
            queue_task_id,
            target_version: run.target_version.clone(),
            target_application: run.target_application.clone(),
            test_project_name: run.test_project_name.clone(),
            test_date_time: records
                .first()
                .and_then(|r| r.date_time())
                .map(String::from),
            suite: suites,
        }
    }

    /// Number of cases in the whole tree.
    pub fn case_count(&self) -> usize {
        self.suite
            .iter()
            .flat_map(|s| &s.tests)
            .flat_map(|t| &t.classes)
            .map(|c| c.cases.len())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{CaseStatus, RecordFields};

    fn record(suite: &str, test: &str, class: &str, name: &str) -> ResultRecord {
        ResultRecord::new(RecordFields {
            case_name: name.to_string(),
            suite_name: Some(suite.to_string()),
            test_name: Some(test.to_string()),
            class_name: Some(class.to_string()),
            duration_ms: 12,
            status: Some(CaseStatus::Pass),
            outputs: vec!["line".to_string()],
            date_time: Some("2015-01-01T08:00:00".to_string()),
            version: "0.0".to_string(),
            ..Default::default()
        })
    }

    #[test]
    fn test_single_record_document_json() {
        let run = RunMetadata {
            target_application: Some("shop".to_string()),
            ..Default::default()
        };
        let record = record("nightly", "smoke", "LoginTest", "testA");
        let doc = RunDocument::for_record(&record, &run, 42);

        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["queueTaskId"], 42);
        assert_eq!(json["targetApplication"], "shop");
        assert!(json.get("targetVersion").is_none());
        assert_eq!(json["testDateTime"], "2015-01-01T08:00:00");

        let suite = &json["suite"][0];
        assert_eq!(suite["name"], "nightly");
        assert_eq!(suite["alias"], "Suite");

        let test = &suite["suite"][0];
        assert_eq!(test["name"], "smoke");
        assert_eq!(test["alias"], "Test");

        let class = &test["class"][0];
        assert_eq!(class["name"], "LoginTest");
        assert_eq!(class["alias"], "Class");

        let case = &class["case"][0];
        assert_eq!(case["name"], "testA");
        assert_eq!(case["suiteName"], serde_json::json!(["nightly"]));
        assert_eq!(case["testLog"], serde_json::json!(["line"]));
        assert_eq!(case["isConfiguration"], false);
        assert_eq!(case["status"], 1);
        assert_eq!(case["duration"], 12);
        assert_eq!(case["version"], "0.0");
        assert!(case.get("bug").is_none());
        assert!(case.get("description").is_none());
    }

    #[test]
    fn test_from_records_groups_in_first_seen_order() {
        let records = vec![
            record("s1", "t1", "C1", "a"),
            record("s2", "t1", "C1", "b"),
            record("s1", "t1", "C2", "c"),
            record("s1", "t1", "C1", "d"),
        ];

        let doc = RunDocument::from_records(&records, &RunMetadata::default(), 1);

        assert_eq!(doc.case_count(), 4);
        assert_eq!(doc.suite.len(), 2);
        assert_eq!(doc.suite[0].name, "s1");
        assert_eq!(doc.suite[1].name, "s2");

        let classes = &doc.suite[0].tests[0].classes;
        assert_eq!(classes.len(), 2);
        assert_eq!(classes[0].name, "C1");
        let names: Vec<_> = classes[0].cases.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "d"]);
    }

    #[test]
    fn test_empty_document() {
        let doc = RunDocument::from_records(&[], &RunMetadata::default(), 1);
        assert_eq!(doc.case_count(), 0);
        assert!(doc.test_date_time.is_none());
    }
}

//! Batch evaluation of an assignment's submissions.
//!
//! Submission listings come from outside (a classroom export, a folder of
//! PDFs) as loosely-typed JSON. Required fields are checked here, before
//! anything reaches the typed pipeline. Each submission is evaluated on its
//! own: a failure is recorded and the batch moves on, except for systemic
//! failures (embedding model, configuration) which stop the batch.

use crate::error::{GraderError, Result, Stage};
use crate::evaluate::Evaluator;
use crate::grader::EvaluationResult;
use crate::llm::ChatBackend;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Prompt used when an assignment carries no description.
pub const MISSING_DESCRIPTION: &str = "No description available";

/// The assignment every submission in a manifest answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub id: String,
    pub title: String,
    /// Prompt handed to the grader.
    pub description: String,
}

/// One student's submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRecord {
    pub student_id: String,
    pub assignment_id: String,
    pub state: String,
    pub attachments: Vec<PathBuf>,
}

impl SubmissionRecord {
    /// Index key scoping this submission's persisted index.
    pub fn key(&self) -> String {
        format!("{}/{}", self.assignment_id, self.student_id)
    }
}

/// An assignment with its submissions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub assignment: Assignment,
    pub submissions: Vec<SubmissionRecord>,
}

fn required_str<'a>(object: &'a Map<String, Value>, field: &str, context: &str) -> Result<&'a str> {
    match object.get(field) {
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s),
        Some(Value::Number(n)) => Err(GraderError::InvalidRecord(format!(
            "{}: field '{}' must be a string, got number {}",
            context, field, n
        ))),
        Some(_) => Err(GraderError::InvalidRecord(format!(
            "{}: field '{}' must be a non-empty string",
            context, field
        ))),
        None => Err(GraderError::InvalidRecord(format!(
            "{}: missing field '{}'",
            context, field
        ))),
    }
}

impl Manifest {
    /// Load a manifest file. Relative attachment paths resolve against its directory.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| GraderError::io(path, e))?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        Self::from_json(&content, base)
    }

    /// Parse and validate a manifest document.
    ///
    /// ```json
    /// {
    ///   "assignment": {"id": "hw1", "title": "Sorting", "description": "Implement bubble sort"},
    ///   "submissions": [
    ///     {"userId": "alice", "state": "TURNED_IN", "attachments": ["alice.pdf"]}
    ///   ]
    /// }
    /// ```
    ///
    /// Attachments may be plain paths or objects with a `path` field.
    pub fn from_json(content: &str, base_dir: &Path) -> Result<Self> {
        let root: Value = serde_json::from_str(content)
            .map_err(|e| GraderError::InvalidRecord(format!("manifest is not valid JSON: {}", e)))?;

        let assignment_obj = root
            .get("assignment")
            .and_then(Value::as_object)
            .ok_or_else(|| GraderError::InvalidRecord("missing 'assignment' object".to_string()))?;

        let id = required_str(assignment_obj, "id", "assignment")?.to_string();
        let title = assignment_obj
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or(id.as_str())
            .to_string();
        let description = assignment_obj
            .get("description")
            .and_then(Value::as_str)
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(MISSING_DESCRIPTION)
            .to_string();

        let raw_submissions = match root.get("submissions") {
            None | Some(Value::Null) => &[][..],
            Some(Value::Array(items)) => items.as_slice(),
            Some(_) => {
                return Err(GraderError::InvalidRecord(
                    "'submissions' must be an array".to_string(),
                ));
            }
        };

        let submissions = raw_submissions
            .iter()
            .enumerate()
            .map(|(i, raw)| parse_submission(raw, i, &id, base_dir))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            assignment: Assignment {
                id,
                title,
                description,
            },
            submissions,
        })
    }

    /// Treat every PDF under `dir` as one submission keyed by its file stem.
    pub fn from_directory(dir: &Path, assignment_id: &str, description: &str) -> Result<Self> {
        if !dir.is_dir() {
            return Err(GraderError::Config(format!(
                "submission directory '{}' does not exist",
                dir.display()
            )));
        }

        let mut pdfs: Vec<PathBuf> = WalkDir::new(dir)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| {
                path.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
            })
            .collect();
        pdfs.sort();

        let submissions = pdfs
            .into_iter()
            .map(|path| SubmissionRecord {
                student_id: path
                    .file_stem()
                    .map(|s| s.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "unknown".to_string()),
                assignment_id: assignment_id.to_string(),
                state: "LOCAL".to_string(),
                attachments: vec![path],
            })
            .collect();

        Ok(Self {
            assignment: Assignment {
                id: assignment_id.to_string(),
                title: assignment_id.to_string(),
                description: description.to_string(),
            },
            submissions,
        })
    }
}

fn parse_submission(raw: &Value, position: usize, assignment_id: &str, base_dir: &Path) -> Result<SubmissionRecord> {
    let context = format!("submission #{}", position + 1);
    let object = raw
        .as_object()
        .ok_or_else(|| GraderError::InvalidRecord(format!("{}: expected an object", context)))?;

    let student_id = required_str(object, "userId", &context)?.to_string();
    let state = object
        .get("state")
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN")
        .to_string();

    let attachments = match object.get("attachments") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                let path = match item {
                    Value::String(s) => s.as_str(),
                    Value::Object(o) => required_str(o, "path", &context)?,
                    _ => {
                        return Err(GraderError::InvalidRecord(format!(
                            "{}: attachment must be a path or an object with 'path'",
                            context
                        )));
                    }
                };
                Ok(base_dir.join(path))
            })
            .collect::<Result<Vec<_>>>()?,
        Some(_) => {
            return Err(GraderError::InvalidRecord(format!(
                "{}: 'attachments' must be an array",
                context
            )));
        }
    };

    Ok(SubmissionRecord {
        student_id,
        assignment_id: assignment_id.to_string(),
        state,
        attachments,
    })
}

/// What happened to one submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Graded { result: EvaluationResult },
    Failed { stage: Stage, error: String },
    Skipped { reason: String },
}

/// One row of the batch report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmissionOutcome {
    pub student_id: String,
    pub state: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

/// Results of grading every submission of an assignment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    pub assignment_id: String,
    pub title: String,
    pub outcomes: Vec<SubmissionOutcome>,
    /// Set when a systemic failure stopped the batch early.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl BatchReport {
    pub fn graded(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Graded { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Failed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, Outcome::Skipped { .. }))
    }

    fn count(&self, pred: impl Fn(&Outcome) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.outcome)).count()
    }

    /// Write the report as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).map_err(|e| GraderError::io(parent, e))?;
            }
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| GraderError::Serialization(e.to_string()))?;
        fs::write(path, json).map_err(|e| GraderError::io(path, e))
    }
}

/// Evaluate every submission in the manifest, one after another.
pub async fn run_batch<B: ChatBackend>(evaluator: &Evaluator<B>, manifest: &Manifest) -> BatchReport {
    let mut report = BatchReport {
        assignment_id: manifest.assignment.id.clone(),
        title: manifest.assignment.title.clone(),
        outcomes: Vec::with_capacity(manifest.submissions.len()),
        aborted: None,
    };

    tracing::info!(
        "Grading {} submissions for '{}'",
        manifest.submissions.len(),
        manifest.assignment.title
    );

    for submission in &manifest.submissions {
        let outcome = if submission.attachments.is_empty() {
            tracing::info!("{}: no attachments, skipping", submission.student_id);
            Outcome::Skipped {
                reason: "no attachments".to_string(),
            }
        } else {
            match evaluator
                .evaluate(
                    &submission.key(),
                    &manifest.assignment.description,
                    &submission.attachments,
                )
                .await
            {
                Ok(result) => Outcome::Graded { result },
                Err(err) => {
                    tracing::error!(
                        "{}: {} stage failed: {}",
                        submission.student_id,
                        err.stage(),
                        err
                    );
                    if err.is_systemic() {
                        report.aborted = Some(err.to_string());
                    }
                    Outcome::Failed {
                        stage: err.stage(),
                        error: err.to_string(),
                    }
                }
            }
        };

        report.outcomes.push(SubmissionOutcome {
            student_id: submission.student_id.clone(),
            state: submission.state.clone(),
            outcome,
        });

        if report.aborted.is_some() {
            tracing::error!("Stopping batch after systemic failure");
            break;
        }
    }

    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_from_json_full() {
        let json = r#"{
            "assignment": {"id": "hw1", "title": "Sorting", "description": "Implement bubble sort"},
            "submissions": [
                {"userId": "alice", "state": "TURNED_IN", "attachments": ["alice.pdf", {"path": "extra/alice2.pdf"}]},
                {"userId": "bob", "state": "CREATED"}
            ]
        }"#;
        let manifest = Manifest::from_json(json, Path::new("/subs")).unwrap();

        assert_eq!(manifest.assignment.id, "hw1");
        assert_eq!(manifest.assignment.description, "Implement bubble sort");
        assert_eq!(manifest.submissions.len(), 2);

        let alice = &manifest.submissions[0];
        assert_eq!(alice.key(), "hw1/alice");
        assert_eq!(
            alice.attachments,
            vec![
                PathBuf::from("/subs/alice.pdf"),
                PathBuf::from("/subs/extra/alice2.pdf")
            ]
        );
        assert!(manifest.submissions[1].attachments.is_empty());
    }

    #[test]
    fn test_missing_description_defaults() {
        let json = r#"{"assignment": {"id": "hw2"}, "submissions": []}"#;
        let manifest = Manifest::from_json(json, Path::new(".")).unwrap();
        assert_eq!(manifest.assignment.description, MISSING_DESCRIPTION);
        assert_eq!(manifest.assignment.title, "hw2");
    }

    #[test]
    fn test_absolute_attachment_kept() {
        let json = r#"{"assignment": {"id": "a"}, "submissions": [{"userId": "u", "attachments": ["/abs/u.pdf"]}]}"#;
        let manifest = Manifest::from_json(json, Path::new("/base")).unwrap();
        assert_eq!(manifest.submissions[0].attachments[0], PathBuf::from("/abs/u.pdf"));
        assert_eq!(manifest.submissions[0].state, "UNKNOWN");
    }

    #[test]
    fn test_rejects_bad_records() {
        let cases = [
            "not json",
            r#"{"submissions": []}"#,
            r#"{"assignment": {"title": "no id"}}"#,
            r#"{"assignment": {"id": "a"}, "submissions": {}}"#,
            r#"{"assignment": {"id": "a"}, "submissions": [{"state": "TURNED_IN"}]}"#,
            r#"{"assignment": {"id": "a"}, "submissions": [{"userId": 42}]}"#,
            r#"{"assignment": {"id": "a"}, "submissions": [{"userId": "u", "attachments": "x.pdf"}]}"#,
            r#"{"assignment": {"id": "a"}, "submissions": [{"userId": "u", "attachments": [7]}]}"#,
            r#"{"assignment": {"id": "a"}, "submissions": ["alice"]}"#,
        ];
        for case in cases {
            let err = Manifest::from_json(case, Path::new(".")).unwrap_err();
            assert!(matches!(err, GraderError::InvalidRecord(_)), "case {case}: {err}");
        }
    }

    #[test]
    fn test_error_names_submission() {
        let json = r#"{"assignment": {"id": "a"}, "submissions": [{"userId": "ok"}, {"state": "x"}]}"#;
        let err = Manifest::from_json(json, Path::new(".")).unwrap_err();
        assert!(err.to_string().contains("submission #2"));
    }

    #[test]
    fn test_from_directory() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bob.pdf"), b"%PDF-").unwrap();
        fs::write(dir.path().join("alice.PDF"), b"%PDF-").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignore").unwrap();

        let manifest = Manifest::from_directory(dir.path(), "hw3", "Write a parser").unwrap();
        let students: Vec<&str> = manifest
            .submissions
            .iter()
            .map(|s| s.student_id.as_str())
            .collect();

        assert_eq!(students, vec!["alice", "bob"]);
        assert_eq!(manifest.assignment.description, "Write a parser");
        assert_eq!(manifest.submissions[0].key(), "hw3/alice");
    }

    #[test]
    fn test_from_missing_directory() {
        assert!(Manifest::from_directory(Path::new("/nonexistent/subs"), "a", "p").is_err());
    }

    #[test]
    fn test_report_serialization_and_counts() {
        let report = BatchReport {
            assignment_id: "hw1".to_string(),
            title: "Sorting".to_string(),
            outcomes: vec![
                SubmissionOutcome {
                    student_id: "alice".to_string(),
                    state: "TURNED_IN".to_string(),
                    outcome: Outcome::Graded {
                        result: EvaluationResult {
                            grade: 90,
                            remarks: "r".to_string(),
                            strengths: "s".to_string(),
                            area_of_improvement: "a".to_string(),
                        },
                    },
                },
                SubmissionOutcome {
                    student_id: "bob".to_string(),
                    state: "TURNED_IN".to_string(),
                    outcome: Outcome::Failed {
                        stage: Stage::Extraction,
                        error: "bad pdf".to_string(),
                    },
                },
            ],
            aborted: None,
        };

        assert_eq!(report.graded(), 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.skipped(), 0);

        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["outcomes"][0]["status"], "graded");
        assert_eq!(value["outcomes"][0]["result"]["grade"], 90);
        assert_eq!(value["outcomes"][1]["stage"], "extraction");
        assert!(value.get("aborted").is_none());

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("reports/hw1.json");
        report.save(&path).unwrap();
        let loaded: BatchReport =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(loaded.outcomes.len(), 2);
    }
}

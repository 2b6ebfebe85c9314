//! Prompts used for grading.

/// Collection of prompts used by the structured grader.
pub struct Prompts;

impl Prompts {
    /// System instruction describing the evaluator role and the output fields.
    pub fn grader_system() -> &'static str {
        r#"You are an automated evaluator. Review the student's submission against the assignment instructions, and provide a grade (out of 100) and remarks.

### Instructions:
1. **Review Assignment**: Understand the task, objectives, and guidelines from the assignment description.
2. **Review Submission**: Assess the student's submission based on:
- **Correctness**: Does it meet the requirements and solve the task?
- **Completeness**: Are all parts addressed?
- **Clarity**: Is it clear and well-organized?
- **Quality**: Is it high quality (correct code, well-written)?
- **Creativity**: (If applicable) Original thinking or approach?

3. **Provide Output**:
- **grade**: Integer grade from 0 to 100.
- **remarks**: Brief feedback highlighting overall performance.
- **strengths**: Brief feedback highlighting strengths.
- **area_of_improvement**: Brief feedback highlighting areas for improvement.

Respond with a single JSON object and nothing else:
{
    "grade": <integer 0-100>,
    "remarks": "<text>",
    "strengths": "<text>",
    "area_of_improvement": "<text>"
}"#
    }

    /// User message carrying the assignment prompt and the retrieved excerpts.
    pub fn grader_user(assignment: &str, excerpts: &str) -> String {
        format!(
            "User Question: {}\n\nStudent Submission:\n\n{}",
            assignment, excerpts
        )
    }
}

use serde::{Deserialize, Serialize};

use crate::repositories::answers::ManualGradingRow;

#[derive(Debug, Deserialize)]
pub(crate) struct GradeAnswerRequest {
    #[serde(alias = "awardedMarks")]
    pub(crate) awarded_marks: i32,
}

#[derive(Debug, Serialize)]
pub(crate) struct ManualAnswerResponse {
    pub(crate) id: String,
    pub(crate) question_id: String,
    pub(crate) question_text: String,
    pub(crate) max_marks: i32,
    pub(crate) response_text: Option<String>,
    pub(crate) is_graded: bool,
    pub(crate) awarded_marks: Option<i32>,
}

impl From<ManualGradingRow> for ManualAnswerResponse {
    fn from(row: ManualGradingRow) -> Self {
        ManualAnswerResponse {
            id: row.id,
            question_id: row.question_id,
            question_text: row.question_text,
            max_marks: row.max_marks,
            response_text: row.response_text,
            is_graded: row.is_graded,
            awarded_marks: row.awarded_marks,
        }
    }
}

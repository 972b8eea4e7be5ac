use serde::{Deserialize, Serialize};
use validator::Validate;

pub(crate) use crate::core::time::format_primitive;
use crate::db::models::Exam;
use crate::db::types::ChoiceOption;

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct ExamCreate {
    #[validate(length(min = 1, max = 200, message = "title must be 1..=200 characters"))]
    pub(crate) title: String,
    #[serde(default)]
    #[validate(length(max = 1000, message = "description must be at most 1000 characters"))]
    pub(crate) description: Option<String>,
    #[serde(alias = "durationMinutes")]
    #[validate(range(min = 1, max = 300, message = "duration_minutes must be 1..=300"))]
    pub(crate) duration_minutes: i32,
    #[serde(alias = "passingMarks")]
    #[validate(range(min = 1, message = "passing_marks must be at least 1"))]
    pub(crate) passing_marks: i32,
    #[serde(default)]
    pub(crate) questions: Vec<QuestionCreate>,
}

/// Authoring payload for one question. Internally tagged so the two kinds
/// carry disjoint fields; a free-text question simply has no option slots.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum QuestionCreate {
    SingleChoice(SingleChoiceCreate),
    FreeText(FreeTextCreate),
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct SingleChoiceCreate {
    #[validate(length(min = 1, max = 1000, message = "question_text must be 1..=1000 characters"))]
    pub(crate) question_text: String,
    #[validate(length(min = 1, max = 500, message = "option_a must be 1..=500 characters"))]
    pub(crate) option_a: String,
    #[validate(length(min = 1, max = 500, message = "option_b must be 1..=500 characters"))]
    pub(crate) option_b: String,
    #[validate(length(min = 1, max = 500, message = "option_c must be 1..=500 characters"))]
    pub(crate) option_c: String,
    #[validate(length(min = 1, max = 500, message = "option_d must be 1..=500 characters"))]
    pub(crate) option_d: String,
    pub(crate) correct_option: ChoiceOption,
    #[validate(range(min = 1, max = 100, message = "marks must be 1..=100"))]
    pub(crate) marks: i32,
}

#[derive(Debug, Deserialize, Validate)]
pub(crate) struct FreeTextCreate {
    #[validate(length(min = 1, max = 1000, message = "question_text must be 1..=1000 characters"))]
    pub(crate) question_text: String,
    #[validate(range(min = 1, max = 100, message = "marks must be 1..=100"))]
    pub(crate) marks: i32,
}

impl QuestionCreate {
    pub(crate) fn validate(&self) -> Result<(), validator::ValidationErrors> {
        match self {
            QuestionCreate::SingleChoice(payload) => payload.validate(),
            QuestionCreate::FreeText(payload) => payload.validate(),
        }
    }

    pub(crate) fn marks(&self) -> i32 {
        match self {
            QuestionCreate::SingleChoice(payload) => payload.marks,
            QuestionCreate::FreeText(payload) => payload.marks,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ExamResponse {
    pub(crate) id: String,
    pub(crate) title: String,
    pub(crate) description: Option<String>,
    pub(crate) duration_minutes: i32,
    pub(crate) total_marks: i64,
    pub(crate) passing_marks: i32,
    pub(crate) is_active: bool,
    pub(crate) question_count: i64,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
}

pub(crate) fn exam_to_response(exam: Exam, total_marks: i64, question_count: i64) -> ExamResponse {
    ExamResponse {
        id: exam.id,
        title: exam.title,
        description: exam.description,
        duration_minutes: exam.duration_minutes,
        total_marks,
        passing_marks: exam.passing_marks,
        is_active: exam.is_active,
        question_count,
        created_at: format_primitive(exam.created_at),
        updated_at: format_primitive(exam.updated_at),
    }
}

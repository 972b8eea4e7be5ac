pub(crate) mod attempts;
pub(crate) mod errors;
pub(crate) mod exams;
pub(crate) mod grading;
pub(crate) mod guards;
pub(crate) mod handlers;
pub(crate) mod router;
